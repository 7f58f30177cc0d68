pub type Result<T> = std::result::Result<T, AlsaError>;

/// Errors from card discovery, mixer access and PCM endpoint setup.
#[derive(Debug, thiserror::Error)]
pub enum AlsaError {
    #[error("sound card topology read failed: {0}")]
    Topology(#[from] std::io::Error),
    #[error("pcm handle not ready after open (card {card}, device {device})")]
    NotReady { card: u32, device: u32 },
    #[error("no pcm device available for card {0}")]
    NoDevice(u32),
    #[error("mixer open failed for card {0}")]
    MixerOpen(u32),
    #[error("backend: {0}")]
    Backend(String),
}
