//! Recipe build engine.
//!
//! The stages run in this order, each fail-fast:
//! toolchain resolution, environment composition, source patching, the
//! build pipeline and fixture staging. Verification lives in `ops::verify`.

pub mod env;
pub mod events;
pub mod patch;
pub mod pipeline;
pub mod stage;
pub mod toolchain;

pub use env::{compose, BuildEnvironment};
pub use events::InstallEvent;
pub use patch::{apply_patch, apply_patches};
pub use pipeline::BuildPipeline;
pub use stage::stage;
pub use toolchain::{CompilerFamily, ToolchainInfo, ToolchainRequirement, ToolchainResolver};
