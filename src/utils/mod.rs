//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod clock;
mod codec;
mod error;
mod hashing;

pub use clock::{unix_millis, unix_secs};
pub use error::ShoalError;
pub use hashing::stable_hash;

pub(crate) use codec::{WireReader, WireWriter, MAX_DATAGRAM};
