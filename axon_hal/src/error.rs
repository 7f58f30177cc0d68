use axon_alsa::{AlsaError, PcmIoError};

pub type Result<T> = std::result::Result<T, HalError>;

/// Error taxonomy of the HAL.
///
/// The framework's write contract means most of these never cross the
/// stream boundary: `write` consumes its bytes regardless, logging and
/// throttling internally. They surface from `open_*` and the voice
/// pipeline, where the caller can act on them.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    /// A role slot could not be resolved to a sound card. Non-fatal at
    /// stream open, fatal at pipeline start.
    #[error("no sound card for {0}")]
    NotFound(&'static str),
    /// PCM transfer failure that survived local recovery.
    #[error("pcm i/o failed: {0}")]
    Io(PcmIoError),
    /// Allocation failure in the voice path.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    /// An exclusive sink is held by another stream.
    #[error("exclusive sink owned by another stream")]
    StateViolation,
    /// Unsupported stream configuration.
    #[error("unsupported configuration: {0}")]
    Misconfiguration(&'static str),
    #[error(transparent)]
    Alsa(#[from] AlsaError),
    #[error(transparent)]
    System(#[from] std::io::Error),
}

impl From<PcmIoError> for HalError {
    fn from(error: PcmIoError) -> Self {
        HalError::Io(error)
    }
}
