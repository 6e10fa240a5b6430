use crate::id::EpochId;
use tracing::error;

/// Typed failure kinds for the termination core. `InvalidEpochUse`,
/// `ChainSetMisuse` (defined in `quiesce-chain`, which reuses this enum) and
/// `ChainSetMergeMismatch` are programmer errors; callers can match on the
/// variant, but `fatal()` below is how the library itself reacts to them.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CoreError {
    #[error("invalid use of epoch {epoch:?} ({label:?}): {reason}")]
    InvalidEpochUse {
        epoch: EpochId,
        label: Option<String>,
        reason: String,
    },

    #[error("chain set misuse: {reason}")]
    ChainSetMisuse { reason: String },

    #[error("chain set merge mismatch: key missing from second chain set")]
    ChainSetMergeMismatch,

    #[error("malformed envelope: {reason}")]
    EnvelopeCorruption { reason: String },
}

impl CoreError {
    pub fn invalid_epoch_use(
        epoch: EpochId,
        label: Option<&str>,
        reason: impl Into<String>,
    ) -> CoreError {
        CoreError::InvalidEpochUse {
            epoch,
            label: label.map(str::to_owned),
            reason: reason.into(),
        }
    }

    /// Log this error at `error!` and abort the process. Used for the three
    /// fatal kinds (§7): `InvalidEpochUse`, `ChainSetMisuse`,
    /// `ChainSetMergeMismatch`. There is no recovery path for these; they
    /// indicate a programmer mistake, not a runtime condition.
    pub fn fatal(self) -> ! {
        error!(target: "quiesce", error = %self, "fatal termination-core error");
        panic!("{self}");
    }
}
