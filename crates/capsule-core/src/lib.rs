//! Core types and lifecycle logic for the time capsule store.
//!
//! Capsules live as one serialized collection in a [`kv::KeyValueStore`]. The
//! [`lifecycle::Lifecycle`] controller layers the open transition and the
//! soft delete with undo on top of the [`store::CapsuleStore`].

// Native `async fn` in traits; the returned futures carry explicit `Send`
// bounds where it matters.
#![allow(async_fn_in_trait)]

pub mod capsule;
pub mod config;
pub mod error;
pub mod kv;
pub mod lifecycle;
pub mod remaining;
pub mod store;
pub mod trash;

pub use error::{Error, Result};
