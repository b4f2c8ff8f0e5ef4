//! Core library for the Hangar control plane
//!
//! This crate contains the domain logic behind the HTTP surface:
//! - Schema validation, pagination and response envelopes
//! - Templates, API keys and computers with soft-delete persistence
//! - The compute provider boundary and heartbeat token issuance
//! - The computer lifecycle manager and its TTL/region policy
//! - Billing webhook verification and dispatch

pub mod api_key;
pub mod billing;
pub mod computer;
pub mod error;
pub mod persist;
pub mod provider;
pub mod schema;
pub mod template;
pub mod token;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
