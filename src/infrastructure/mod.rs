//! Infrastructure layer - Registry, splitting, analysis and monitoring implementations

pub mod experiment;
pub mod logging;
pub mod metrics;
pub mod observability;
pub mod services;

pub(crate) mod sync;
