//! CLI command implementations.

pub mod apply;
pub mod register;
pub mod simulate;
pub mod state;
