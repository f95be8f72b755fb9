pub mod alarm;
pub mod checksum;
pub mod codec;
pub mod commands;
pub mod grammar;
pub mod identity;
pub mod sentences;
