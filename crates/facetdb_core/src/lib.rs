//! # FacetDB Core
//!
//! An embedded multi-model database engine. One transactional keyspace
//! serves four workloads at once:
//!
//! - **Relational / document**: schemaless entities addressed by
//!   `(table, pk)`, with secondary indexes over their fields
//! - **Graph**: typed, weighted edges between entities, with BFS and
//!   shortest-path traversals
//! - **Vector**: HNSW approximate nearest-neighbour search over embedding
//!   fields
//! - **Full-text and geo**: inverted token indexes and Morton-coded
//!   spatial indexes
//!
//! Everything derived (index entries, graph adjacency, vector records) is
//! a *projection*: extra keys in the same canonical keyspace, written in
//! the same atomic commit batch as the entity that produced them. A commit
//! either publishes the entity and every projection, or nothing.
//!
//! Transactions give MVCC snapshot isolation with optimistic write-write
//! conflict detection. Durability is write-ahead logged; recovery replays
//! committed transactions and discards torn tails.
//!
//! The query layer plans hybrid structured + vector queries with a
//! cost-based planner (cardinality probing decides pre-filter versus
//! post-filter fusion) and executes them on a work-stealing thread pool.
//!
//! ## Quick start
//!
//! ```rust
//! use facetdb_core::{Engine, EngineConfig, Entity, Value};
//!
//! let engine = Engine::open_in_memory(EngineConfig::default()).unwrap();
//!
//! let txn = engine.begin();
//! let user = Entity::new("users", "u1").with_field("age", Value::Int(30));
//! engine.put(txn, user).unwrap();
//! engine.commit(txn).unwrap();
//!
//! let found = engine.get_entity("users", "u1").unwrap().unwrap();
//! assert_eq!(found.field("age"), Some(&Value::Int(30)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod dir;
mod engine;
mod entity;
mod error;
mod keyspace;
mod manifest;
mod stats;
mod types;

pub mod graph;
pub mod index;
pub mod query;
pub mod store;
pub mod transaction;
pub mod vector;
pub(crate) mod wal;

pub use config::EngineConfig;
pub use engine::Engine;
pub use entity::Entity;
pub use error::{EngineError, EngineResult};
pub use stats::{EngineStats, StatsSnapshot};
pub use store::ScanPage;
pub use transaction::{AuditEvent, IsolationLevel};
pub use types::{EntityKey, SequenceNumber, TransactionId};

// Re-export the value model; it is half the public API surface.
pub use facetdb_codec::{Value, ValueKind};
