//! Shared mqrelay envelope and error model types.
//!
//! This crate is dependency-light so both the engine and external
//! tooling (queue inspectors, test harnesses) can use it.

pub mod destination;
pub mod error;
pub mod message;

pub use destination::{Destination, DestinationKind};
pub use error::{EngineError, ErrorCategory};
pub use message::{DeliveryTag, Message};
