//! # symdex - Incremental Index Coordination Engine
//!
//! symdex turns source trees into a searchable symbol/text store and answers
//! structured queries with cost-aware planning.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`coordinator`] - File discovery, change detection, task scheduling and
//!   bounded-concurrency indexing with progress and cancellation
//! - [`optimizer`] - Cost estimation, query rewriting, index selection, plan
//!   execution and index recommendations
//! - [`plugin`] - Language parser capability trait and registry
//! - [`storage`] - Storage port boundary plus the in-memory reference backend
//! - [`model`] - Shared data model (queries, tasks, results)
//! - [`output`] - Terminal result formatting
//!
//! ## Quick Start
//!
//! ```ignore
//! use symdex::config::{CoordinatorConfig, IndexOptions, OptimizerConfig};
//! use symdex::coordinator::IndexCoordinator;
//! use symdex::model::{Query, QueryKind};
//! use symdex::optimizer::QueryOptimizer;
//! use symdex::plugin::PluginRegistry;
//! use symdex::storage::MemoryStore;
//! use std::sync::Arc;
//!
//! let storage = Arc::new(MemoryStore::new());
//! let coordinator = IndexCoordinator::new(
//!     Arc::new(PluginRegistry::with_defaults()),
//!     storage.clone(),
//!     CoordinatorConfig::default(),
//! );
//! let batch = coordinator
//!     .index_directory("/path/to/codebase".as_ref(), &IndexOptions::default())
//!     .unwrap();
//! println!("indexed {} files", batch.indexed);
//!
//! let optimizer = QueryOptimizer::new(storage, OptimizerConfig::default());
//! let query = Query::new(QueryKind::Symbol, "parse_file").with_filter("language", "rust");
//! for hit in optimizer.search(&query).unwrap().hits {
//!     println!("{}:{}", hit.path.display(), hit.line);
//! }
//! ```
//!
//! ## Change detection
//!
//! Incremental updates hinge on 128-bit content fingerprints, never mtimes:
//! an unchanged file is skipped without touching a parser or storage. The
//! fingerprint cache and the result cache are linked through the storage
//! port's index version, so indexing new data invalidates stale query
//! results automatically.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod output;
pub mod plugin;
pub mod storage;
