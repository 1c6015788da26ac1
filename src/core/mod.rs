//! Core data structures for kettle.
//!
//! - The declarative recipe model and its TOML schema
//! - The error taxonomy shared by every stage of an install

pub mod error;
pub mod recipe;

pub use error::RecipeError;
pub use recipe::{
    BuildStep, EnvironmentSpec, FixtureMapping, PackageInfo, PatchSpec, Placeholders, Recipe,
    VerificationCase, VerifySpec, WrapperKind,
};
