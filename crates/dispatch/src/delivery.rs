//! Intake delivery history, as seen by the delivery recovery watcher.

use serde::{Deserialize, Serialize};

use crate::{DeliveryGuid, DeliveryId, Timestamp};

/// One delivery attempt of one intake event.
///
/// Redeliveries of the same event share a [`DeliveryGuid`] and receive fresh,
/// strictly larger [`DeliveryId`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    /// Identifier of this attempt.
    pub id: DeliveryId,
    /// Logical event identifier shared by all attempts.
    pub guid: DeliveryGuid,
    /// `true` if the receiver acknowledged the attempt with a 2xx.
    pub succeeded: bool,
    /// `true` if the attempt was a redelivery rather than the original.
    pub redelivery: bool,
    /// When the attempt was made.
    pub delivered_at: Timestamp,
    /// Event kind header (e.g. `workflow_job`).
    pub event: String,
}
