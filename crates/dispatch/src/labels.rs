//! Capability labels and label-set comparison.
//!
//! Labels are compared case-insensitively, so they are normalised to lower case
//! on construction. The generic `self-hosted` label is never a capability: it is
//! always satisfied when matching and is skipped by every coverage comparison.

use serde::{Deserialize, Serialize};

/// The generic label every self-hosted runner carries implicitly.
pub const SELF_HOSTED: &str = "self-hosted";

/// A single capability label, normalised to lower case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(String);

impl Label {
    /// Creates a label, trimming surrounding whitespace and lower-casing it.
    ///
    /// Returns `None` for an empty (or all-whitespace) value.
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_lowercase()))
        }
    }

    /// Wraps text that is already non-empty, trimmed and lower case.
    pub(crate) fn from_normalised(value: String) -> Self {
        Self(value)
    }

    /// Returns the normalised label text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the generic `self-hosted` label.
    pub fn is_self_hosted(&self) -> bool {
        self.0 == SELF_HOSTED
    }
}

impl TryFrom<String> for Label {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Label::new(&value).ok_or_else(|| "label must not be empty".to_string())
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------

/// An ordered, duplicate-free set of labels.
///
/// Insertion order is preserved because registration labels are forwarded to
/// the provider in the order they were configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Label>", into = "Vec<Label>")]
pub struct LabelSet(Vec<Label>);

impl LabelSet {
    /// Creates an empty label set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a label set from raw strings, dropping empty values and duplicates.
    pub fn from_strs<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        values.into_iter().filter_map(Label::new).collect()
    }

    /// Appends `label` unless an equal label is already present.
    pub fn insert(&mut self, label: Label) {
        if !self.0.contains(&label) {
            self.0.push(label);
        }
    }

    /// Returns `true` if the set contains `label` (case-insensitive).
    pub fn contains(&self, label: &str) -> bool {
        let wanted = label.trim().to_lowercase();
        self.0.iter().any(|l| l.0 == wanted)
    }

    /// Iterates over every label, including `self-hosted` if present.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Iterates over capability labels only (everything except `self-hosted`).
    pub fn capabilities(&self) -> impl Iterator<Item = &Label> {
        self.0.iter().filter(|l| !l.is_self_hosted())
    }

    /// Returns `true` if the set advertises no capability label.
    pub fn has_no_capabilities(&self) -> bool {
        self.capabilities().next().is_none()
    }

    /// Number of labels, including `self-hosted`.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the set holds no labels at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if every capability in `requested` is also in `self`.
    ///
    /// This is the matching rule used for backend selection: a backend covers a
    /// job when it advertises every capability the job asks for.
    pub fn covers(&self, requested: &LabelSet) -> bool {
        requested.capabilities().all(|l| self.0.contains(l))
    }

    /// Returns `true` if both sets advertise exactly the same capabilities.
    pub fn same_capabilities(&self, other: &LabelSet) -> bool {
        self.covers(other) && other.covers(self)
    }

    /// Returns the labels as owned strings, in order.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|l| l.0.clone()).collect()
    }
}

impl FromIterator<Label> for LabelSet {
    fn from_iter<T: IntoIterator<Item = Label>>(iter: T) -> Self {
        let mut set = LabelSet::new();
        for label in iter {
            set.insert(label);
        }
        set
    }
}

impl From<Vec<Label>> for LabelSet {
    fn from(labels: Vec<Label>) -> Self {
        labels.into_iter().collect()
    }
}

impl From<LabelSet> for Vec<Label> {
    fn from(set: LabelSet) -> Self {
        set.0
    }
}

impl std::fmt::Display for LabelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_strings().join(","))
    }
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod tests;
