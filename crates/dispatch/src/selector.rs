//! Backend selection.
//!
//! A job is routed to the first configured backend that advertises every
//! capability the job requests; `self-hosted` is always satisfied. An optional
//! selector hook may then override the decision. The table is validated once
//! at startup because its shape decides which backends are reachable at all.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{DispatchError, HookError};
use crate::labels::LabelSet;
use crate::{BackendDescriptor, Selection};

/// Severity of a configuration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingLevel {
    /// The configuration must not be used.
    Error,
    /// The configuration works but may surprise the operator.
    Warning,
}

/// One observation produced by configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// How serious the finding is.
    pub level: FindingLevel,
    /// Human-readable description.
    pub message: String,
}

impl Finding {
    /// Creates an error finding.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FindingLevel::Error,
            message: message.into(),
        }
    }

    /// Creates a warning finding.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: FindingLevel::Warning,
            message: message.into(),
        }
    }
}

/// Checks a backend table for unreachable or ambiguous entries.
///
/// Pairwise comparison over the configured list; intended to run once at
/// startup.
pub fn validate_backend_table(descriptors: &[BackendDescriptor]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut seen = HashSet::new();

    for descriptor in descriptors {
        if !seen.insert(descriptor.id.as_str()) {
            findings.push(Finding::error(format!(
                "backend '{}' is configured more than once",
                descriptor.id
            )));
        }
        if descriptor.labels.has_no_capabilities() {
            findings.push(Finding::error(format!(
                "backend '{}' advertises no labels besides self-hosted",
                descriptor.id
            )));
        }
    }

    for (i, earlier) in descriptors.iter().enumerate() {
        for later in &descriptors[i + 1..] {
            if earlier.labels.same_capabilities(&later.labels) {
                findings.push(Finding::error(format!(
                    "backends '{}' and '{}' advertise the same labels ({}); '{}' can never be selected",
                    earlier.id, later.id, earlier.labels, later.id
                )));
            } else if earlier.labels.covers(&later.labels) {
                findings.push(Finding::warning(format!(
                    "backend '{}' ({}) covers every label of later backend '{}' ({}); '{}' will never be selected",
                    earlier.id, earlier.labels, later.id, later.labels, later.id
                )));
            } else if later.labels.covers(&earlier.labels) {
                findings.push(Finding::warning(format!(
                    "backend '{}' ({}) is a subset of later backend '{}' ({}); jobs requesting only '{}' labels go to '{}'",
                    earlier.id, earlier.labels, later.id, later.labels, earlier.id, earlier.id
                )));
            }
        }
    }

    findings
}

// ---------------------------------------------------------------------------

/// The validated, ordered backend table.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTable {
    descriptors: Vec<BackendDescriptor>,
}

impl BackendTable {
    /// Validates `descriptors` and builds the table.
    ///
    /// Warnings are logged; any error finding fails the whole table.
    pub fn new(descriptors: Vec<BackendDescriptor>) -> Result<Self, DispatchError> {
        if descriptors.is_empty() {
            return Err(DispatchError::Configuration {
                message: "at least one backend must be configured".to_string(),
            });
        }

        let findings = validate_backend_table(&descriptors);
        let errors: Vec<&str> = findings
            .iter()
            .filter(|f| f.level == FindingLevel::Error)
            .map(|f| f.message.as_str())
            .collect();
        if !errors.is_empty() {
            return Err(DispatchError::Configuration {
                message: errors.join("; "),
            });
        }
        for finding in &findings {
            warn!(finding = %finding.message, "Backend table overlap");
        }

        Ok(Self { descriptors })
    }

    /// Returns the descriptors in configured order.
    pub fn descriptors(&self) -> &[BackendDescriptor] {
        &self.descriptors
    }

    /// Looks up a descriptor by identifier.
    pub fn get(&self, id: &str) -> Option<&BackendDescriptor> {
        self.descriptors.iter().find(|d| d.id.as_str() == id)
    }

    /// Default selection: the first backend covering every requested label.
    pub fn select(&self, requested: &LabelSet) -> Option<Selection> {
        let chosen = self.descriptors.iter().find(|d| d.labels.covers(requested));
        match chosen {
            Some(descriptor) => {
                debug!(backend = %descriptor.id, requested = %requested, "Backend matched");
                Some(Selection {
                    backend: descriptor.id.clone(),
                    labels: descriptor.labels.clone(),
                })
            }
            None => {
                debug!(requested = %requested, "No backend matched");
                None
            }
        }
    }

    /// Applies a selector hook's answer to the default selection.
    ///
    /// - no answer keeps the default;
    /// - an answer without a backend skips the job;
    /// - an answer naming a backend must name a configured one, and must carry
    ///   labels unless it names the default backend (whose labels are kept).
    pub fn apply_override(
        &self,
        default: Option<Selection>,
        answer: Option<HookOverride>,
    ) -> Result<Option<Selection>, HookError> {
        let Some(answer) = answer else {
            return Ok(default);
        };
        let Some(backend) = answer.backend else {
            return Ok(None);
        };

        let descriptor = self
            .get(&backend)
            .ok_or_else(|| HookError::UnknownBackend {
                backend: backend.clone(),
            })?;

        let labels = LabelSet::from_strs(answer.labels.unwrap_or_default());
        if !labels.is_empty() {
            return Ok(Some(Selection {
                backend: descriptor.id.clone(),
                labels,
            }));
        }

        match default {
            Some(default) if default.backend == descriptor.id => Ok(Some(default)),
            _ => Err(HookError::EmptyLabels {
                backend: descriptor.id.clone(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------

/// What the selector hook receives.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInput {
    /// The raw intake payload.
    pub payload: serde_json::Value,
    /// Every configured backend, in order.
    pub backends: Vec<BackendDescriptor>,
    /// The default selection, if any backend matched.
    pub default_selection: Option<Selection>,
}

/// What the selector hook may answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOverride {
    /// Backend to use; absent means "do not provision a worker".
    #[serde(default)]
    pub backend: Option<String>,
    /// Labels to register the worker under.
    #[serde(default)]
    pub labels: Option<Vec<String>>,
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod tests;
