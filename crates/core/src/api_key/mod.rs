//! API key module
//!
//! Project-scoped keys for programmatic clients. The raw key is returned once at
//! creation; afterwards only a hint is ever exposed.

mod cipher;
mod model;
mod store;

pub use cipher::*;
pub use model::*;
pub use store::*;
