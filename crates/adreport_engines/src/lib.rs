#![forbid(unsafe_code)]

pub mod alloc;
pub mod apportion;
pub mod budget;
pub mod impressions;
pub mod rate;
pub mod weight;
