//! Canonical streaming protocol.
//!
//! Provider events pass through an [`IdleTimeoutStream`] and a
//! [`StreamNormalizer`] before they become [`StreamEvent`]s on the wire.

mod events;
mod idle;
mod normalizer;

pub use events::{CreditSnapshot, DonePayload, StreamEvent};
pub use idle::IdleTimeoutStream;
pub use normalizer::{NormalizedOutput, StreamNormalizer};
