//! Concrete jobs shipped with the crate

pub mod command;

pub use command::{CommandJob, CommandSpec};
