//! # Axon Core
//!
//! This crate contains the core mechanisms of the voice-bridging audio
//! HAL: the bounded voice ring buffer that couples the capture thread to
//! the modem uplink writer, the mono-downmix/rate-conversion kernel, and
//! the small pieces of shared state (capture statistics, cancellation,
//! diagnostics configuration) the rest of the workspace builds on.

pub mod cancel;
pub mod constants;
pub mod diag;
pub mod resample;
pub mod ring;
pub mod stats;

pub use cancel::CancelToken;
pub use diag::{Diagnostics, HdmiInRate};
pub use resample::VoiceResampler;
pub use ring::VoiceRing;
pub use stats::{CaptureStats, SignalClass};
