//! `jobrelay-classify`
//!
//! **Responsibility:** the product categorization capability run by workers.
//!
//! This crate is intentionally **not** part of the job system:
//! - It knows nothing about channels, stores, or job states.
//! - It only implements [`jobrelay_core::Compute`].
//! - Its output is an opaque JSON value as far as the job system is concerned.

pub mod categorizer;
pub mod preprocess;

pub use categorizer::{CategoryPrediction, LABELS, ProductCategorizer};
pub use preprocess::{normalize_fields, preprocess};
