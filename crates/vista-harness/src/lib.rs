#![forbid(unsafe_code)]

//! Test harness and reference models for vista.
//!
//! - [`Recorder`]: captures notifications verbatim, batch markers included.
//! - [`Mirror`]: rebuilds the decorated output from change events alone.
//! - [`model`]: from-scratch reference outputs for the built-in decorators.
//! - [`nested`]: a parent with linked children, for flatten chains.
//! - [`strategy`]: proptest strategies for mutation scripts and chains.
//!
//! The core property every integration test leans on: after any mutation
//! script, a [`Mirror`] equals a fresh decorated read, and that read equals
//! [`ChainSpec::expected`](model::ChainSpec::expected) over the source, up to
//! order where [`ChainSpec::agrees`](model::ChainSpec::agrees) says so.

pub mod mirror;
pub mod model;
pub mod nested;
pub mod recorder;
pub mod strategy;

pub use mirror::Mirror;
pub use model::{ChainSpec, StageSpec};
pub use nested::{Family, FamilyOp};
pub use recorder::{Recorded, Recorder};
pub use strategy::Op;

/// Install a compact test subscriber honoring `RUST_LOG`; repeat calls are
/// no-ops.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .compact()
        .try_init();
}
