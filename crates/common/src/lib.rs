//! Shared types for the Portcullis ACME request-authentication layer.
//!
//! This crate holds the pieces every other crate agrees on:
//!
//! - [`ProblemDetails`]: the single caller-facing rejection type
//! - [`ServiceError`]: the error taxonomy of backend calls (storage, RPC)
//! - [`AccountId`] / [`RequestId`]: identifier newtypes
//! - [`Clock`]: an injectable time source for TTL logic

pub mod clock;
pub mod errors;
pub mod ids;
pub mod problem;

pub use clock::{Clock, FakeClock, SystemClock};
pub use errors::ServiceError;
pub use ids::{AccountId, RequestId};
pub use problem::{ProblemDetails, ProblemKind};
