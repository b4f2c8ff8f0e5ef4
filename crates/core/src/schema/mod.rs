//! Canonical request/response shapes shared by every external boundary.
//!
//! Untrusted input is turned into typed values here, or rejected with a
//! [`ValidationError`] listing every violated field.

mod envelope;
mod pagination;
mod validation;

pub use envelope::*;
pub use pagination::*;
pub use validation::*;
