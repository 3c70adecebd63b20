//! Shared utilities for the filing analysis workspace
//!
//! Binaries call [`init_tracing`] once at startup; library crates only emit
//! `tracing` events and never install a subscriber themselves.

pub mod logging;

pub use logging::{LogFormat, init_tracing, init_tracing_with};
