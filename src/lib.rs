//! Petal Synth Library
//!
//! A fixed-point modular audio engine. Module instances exchange 16-bit
//! signals in blocks; the host pulls one root output per block and the
//! graph renders whatever that output depends on.

pub mod dsp;
pub mod engine;
pub mod modules;
pub mod persistence;
