#![forbid(unsafe_code)]

pub mod report_cli;
