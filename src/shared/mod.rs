// Shared kernel - chain types, constants, errors and helpers

pub mod constants;
pub mod error;
pub mod types;
pub mod utils;

pub type Result<T> = anyhow::Result<T>;
