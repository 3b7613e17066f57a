//! Structured errors for the folio worker.

use crate::lifecycle::LifecycleState;
use folio_core::BrokerError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Core(#[from] folio_core::Error),

    #[error("PROTOCOL_ERROR: {0}")]
    Broker(#[from] BrokerError),

    /// A transport line that is not a valid frame.
    #[error("INVALID_FRAME: {0}")]
    InvalidFrame(String),

    #[error("INVALID_STATE: cannot {action} while {state}")]
    InvalidState { action: &'static str, state: LifecycleState },

    #[error("IO_ERROR: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_keeps_core_code() {
        let err = WorkerError::from(folio_core::Error::InstallFailed("/offline.html: status 404".into()));
        assert_eq!(err.to_string(), "INSTALL_FAILED: /offline.html: status 404");
    }

    #[test]
    fn test_invalid_state_display() {
        let err = WorkerError::InvalidState { action: "activate", state: LifecycleState::Redundant };
        assert_eq!(err.to_string(), "INVALID_STATE: cannot activate while redundant");
    }
}
