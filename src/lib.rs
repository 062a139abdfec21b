//! Audience-voted single-elimination brackets with an append-only SQLite journal.
//!
//! # Examples
//!
//! Building and deciding a bracket in memory:
//! ```
//! use votebracket::{
//!     core::{repository::Repository, store::BracketStore},
//!     engine::{builder::BracketBuilder, round::cast_vote},
//!     types::Side,
//! };
//!
//! let mut store = BracketStore::new();
//! let a = store.create_entry().expect("entry").id;
//! let b = store.create_entry().expect("entry").id;
//! let voter = store.create_user("alice").expect("user").id;
//!
//! let bracket = BracketBuilder::new(&mut store)
//!     .build("Best editor", 1, &[a, b])
//!     .expect("build");
//! let finale = bracket.rounds[0];
//!
//! let (_, resolution) = cast_vote(&mut store, None, finale, voter, Side::Left).expect("vote");
//! assert_eq!(resolution.map(|r| r.winner), Some(a));
//! assert_eq!(store.get_bracket(bracket.id).and_then(|b| b.winner), Some(a));
//! ```
//!
//! Runtime usage with a SQLite journal:
//! ```no_run
//! use votebracket::{config::Config, runtime::handle::open_engine, types::Side};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::from_file("votebracket.toml").expect("config").with_environment();
//! let engine = open_engine(&config, None).expect("open");
//! let entries = vec![
//!     engine.create_entry().await.expect("entry"),
//!     engine.create_entry().await.expect("entry"),
//! ];
//! let bracket = engine.create_bracket("Best editor", 3, entries).await.expect("bracket");
//! let user = engine.create_user("alice").await.expect("user");
//! engine.vote(bracket.rounds[0], user.id, Side::Right).await.expect("vote");
//! engine.shutdown().await.expect("shutdown");
//! # }
//! ```

/// TOML configuration with environment overrides.
pub mod config;
/// Authoritative in-memory store and the repository contract.
pub mod core;
/// Bracket construction, round voting and cache invalidation.
pub mod engine;
/// Timestamped stderr logger for the `log` facade.
pub mod logger;
/// Entries, users, brackets and rounds.
pub mod model;
/// Mutation op model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared identifier types and the slot side.
pub mod types;
