//! Probe client for a TCP service that answers 8-byte big-endian integers,
//! plus the doubler peer it is run against.

pub mod codec;
pub mod config;
pub mod error;
pub mod peer;
pub mod probe;

pub use codec::{decode, encode, IntCodec, WIRE_VALUE_LEN};
pub use config::Config;
pub use error::ProbeError;
pub use probe::{Connection, Phase, ProbeReport, PHASE_A, PHASE_B, PHASE_C};
