//! # Axon ALSA
//!
//! The hardware seam of the voice-bridging audio HAL. Everything that
//! touches the kernel lives here: discovery of sound cards from the
//! `/proc/asound` topology, the PCM endpoint lifecycle with XRUN
//! recovery, and mixer route programming.
//!
//! Hardware access goes through the [`backend::PcmBackend`] and
//! [`mixer::MixerBackend`] traits. The `alsa-backend` feature provides
//! implementations on top of alsa-lib; the `fake` feature provides
//! in-memory implementations for tests and host-side development.

pub mod backend;
pub mod backends;
pub mod cards;
pub mod config;
pub mod endpoint;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod mixer;
pub mod route;

pub use backend::{Direction, PcmBackend, PcmHandle, PcmIoError, PcmIoResult};
pub use cards::{CardAddress, CardScanner, CardTopology, InputRole, OutputRole};
pub use config::{PcmConfig, SampleFormat};
pub use endpoint::{PcmEndpoint, PcmState};
pub use error::{AlsaError, Result};
pub use mixer::{MixerBackend, MixerDevice, MixerSetting};
pub use route::{RouteController, RouteId};
