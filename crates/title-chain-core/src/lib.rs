//! # Title Chain Core
//!
//! Shared, I/O-free logic for Title Chain: data models, the legal-description
//! parser and matcher, the party-name matcher, the search queue state machine,
//! the chain builder, completeness and gap detection, and the store
//! abstraction.
//!
//! This crate contains no tokio, sqlx, network or filesystem I/O. The
//! application crate supplies a concrete [`store::Store`], a search provider
//! and the discovery loop that drives everything here.

pub mod chain;
pub mod completeness;
pub mod disjoint;
pub mod fuzzy;
pub mod legal;
pub mod models;
pub mod names;
pub mod queue;
pub mod refs;
pub mod store;
