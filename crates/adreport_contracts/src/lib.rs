#![forbid(unsafe_code)]

pub mod alloc;
pub mod app;
pub mod common;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, Validate};
