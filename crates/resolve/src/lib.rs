//! `givegrid-resolve` - donor identity resolution and recurring-donor classification.
//!
//! Pure engine crate: receives pre-loaded snapshots, returns corrected datasets.
//! No database dependencies.

pub mod analysis;
pub mod annotate;
pub mod check;
pub mod config;
pub mod error;
pub mod export;
pub mod group;
pub mod load;
pub mod merge;
pub mod model;
pub mod pipeline;
pub mod recurring;
pub mod registration;

pub use config::RunConfig;
pub use error::ResolveError;
pub use model::{DonorId, DonorMap, MergeKey, ResolveResult, Snapshot};
pub use pipeline::{run, run_with_reference};
pub use recurring::RecurringRules;
