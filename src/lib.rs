//! Kettle - a recipe-driven build engine
//!
//! This crate provides the library behind the `kettle` command: it resolves a
//! versioned compiler toolchain, composes an explicit build environment,
//! patches an unpacked source tree, runs the build pipeline, stages
//! regression fixtures and verifies the installed artifact.

pub mod builder;
pub mod core;
pub mod ops;
pub mod util;

/// Test utilities and mocks for Kettle unit tests.
///
/// This module is only available when compiling with `--cfg test` or
/// running tests. It provides a fake process runner and source tree fixtures.
#[cfg(test)]
pub mod test_support;

pub use core::{error::RecipeError, recipe::Recipe};
pub use util::config::Config;
