//! Settlement decision for a processed delivery

use crate::error::DispatchError;

/// Outcome reported to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Remove from the broker's in-flight set
    Accept,
    /// Report as failed; broker policy governs redelivery or dead-lettering
    Reject,
}

impl Disposition {
    /// Accept on dispatch success, reject on any failure
    pub fn for_outcome<T>(outcome: &Result<T, DispatchError>) -> Self {
        match outcome {
            Ok(_) => Disposition::Accept,
            Err(_) => Disposition::Reject,
        }
    }

    /// Label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Accept => "accept",
            Disposition::Reject => "reject",
        }
    }
}
