//! Library surface of the muxgated binary, split out so integration tests
//! can drive the reconciler directly.

pub mod cli;
pub mod reconcile;
pub mod tracing_init;
