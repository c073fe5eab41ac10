//! # Dispatch
//!
//! The server side of an exchange: an immutable [`Registry`] of handlers and
//! the [`Dispatcher`] that turns a raw request body into a reply.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{DispatchOutcome, Dispatcher, KeyResolver, ResolveError, SessionKeys};
pub use registry::{Handler, Registry, RegistryBuilder, RegistryError, Request};
