pub mod config;
pub mod error;
pub mod formatter;
pub mod log;
pub mod protocol;
pub mod report;
