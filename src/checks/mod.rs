//! The governance checks, one module per rule family.
//!
//! Each check reads the stores through [`crate::core::store::RecordStore`]
//! and returns a [`crate::core::report::CheckOutcome`]; none of them writes.

pub mod append_only;
pub mod artifacts;
pub mod budget;
pub mod pipeline;
pub mod requests;
