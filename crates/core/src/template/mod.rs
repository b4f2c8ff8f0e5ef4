//! Template module
//!
//! A Template is the blueprint (image, machine shape, init command) computers are
//! created from. Templates without a project are global and always public.

mod model;
mod store;

pub use model::*;
pub use store::*;
