//! Configuration, logging and process helpers shared by every command.

pub mod config;
pub mod debug;
pub mod process;
