//! # Title Chain
//!
//! Iterative title discovery: reconstructs a property's chain of title and
//! its open encumbrances from a public-records search index, starting from
//! a handful of seed facts.
//!
//! Each property run keeps a prioritized, deduplicated queue of searches.
//! Every recorded document that comes back yields new search vectors
//! (legal description permutations, referenced instruments, party names,
//! neighbouring instrument numbers) until the chain is complete, the queue
//! runs dry or a budget is exhausted.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Seed file │──▶│  Discovery   │──▶│    SQLite     │
//! │ TOML/JSON │   │ queue+engine │   │ docs / tasks  │
//! └───────────┘   └──────┬───────┘   └───────┬───────┘
//!                        │                   │
//!                        ▼                   ▼
//!                 ┌──────────────┐    ┌─────────────┐
//!                 │ Records index│    │ Chain build │
//!                 │ (throttled)  │    │  + reports  │
//!                 └──────────────┘    └─────────────┘
//! ```
//!
//! The pure logic (matching, legal parsing, queue, chain building) lives in
//! `title-chain-core`; this crate adds configuration, SQLite persistence,
//! the search provider, the engine loop and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite-backed document/queue/identity store |
//! | [`provider`] | Records index clients (HTTP, fixture) |
//! | [`gate`] | Shared concurrency and rate gate for the provider |
//! | [`seed`] | Seed-fact files |
//! | [`discovery`] | The iterative discovery engine |
//! | [`discover_cmd`] | `tchain discover` |
//! | [`report`] | Chain, queue and document reports |
//! | [`stats`] | `tchain stats` |
//! | [`logging`] | Tracing setup |

pub mod config;
pub mod db;
pub mod discover_cmd;
pub mod discovery;
pub mod gate;
pub mod logging;
pub mod migrate;
pub mod provider;
pub mod report;
pub mod seed;
pub mod sqlite_store;
pub mod stats;
