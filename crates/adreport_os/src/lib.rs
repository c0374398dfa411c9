#![forbid(unsafe_code)]

pub mod catalog;
pub mod enrich;
pub mod report;
pub mod selection;
