//! Ephemeral computers provisioned from templates

mod lifecycle;
mod model;
mod policy;
mod store;

pub use lifecycle::*;
pub use model::*;
pub use policy::*;
pub use store::*;
