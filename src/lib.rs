//! Kiln - layered build pipeline for Rust services
//!
//! Compiles a project's dependencies once per manifest fingerprint into a
//! shared cache, recompiles only the project's own code on top of it, and
//! assembles the resulting binary into a minimal runtime image.

pub mod build;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod image;
pub mod manifest;
pub mod pipeline;
pub mod ui;

#[cfg(test)]
mod testutil;

pub use error::{KilnError, KilnResult};
