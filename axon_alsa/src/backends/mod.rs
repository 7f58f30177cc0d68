//! Hardware backend implementations.

#[cfg(feature = "alsa-backend")]
mod alsa;

#[cfg(feature = "alsa-backend")]
pub use alsa::{AlsaMixerBackend, AlsaPcmBackend};
