//! Hardware backends.
//!
//! Each backend is gated behind a feature flag.

#[cfg(feature = "ftdi")]
pub mod ftdi;
