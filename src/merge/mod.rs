//! Additive JSON merge engine for localization data
//!
//! Reconciles a source-language reference document into a locally translated
//! one record-by-record. Both halves are pure and non-failing: absence of
//! data is "no match / no change", never an error.

mod engine;
mod identity;

pub use engine::additive_merge;
pub use identity::identity_of;
