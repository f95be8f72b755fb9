pub mod config;
pub mod decoder;
pub mod protocol;
pub mod report;
pub mod session;
