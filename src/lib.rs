//! # Repo QA
//!
//! Retrieval-augmented question answering over a single code repository.
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Repository │──▶│   Indexer    │──▶│ Vector index │
//! │ git / dir  │   │ chunk+embed  │   │ SQLite / mem │
//! └────────────┘   └──────────────┘   └──────┬───────┘
//!                                            │
//!        query ──▶ scope check ──▶ retrieve ─┘──▶ synthesize ──▶ answer
//!                       └──▶ out-of-scope reply
//! ```
//!
//! Domain types, the chunker, and the store abstraction live in
//! `repo-qa-core`. This crate adds configuration, persistence, the network
//! capability clients, the query workflow, and the CLI and HTTP surfaces.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`repository`] | Clone/scan the repository into a file set |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | Persistent vector store |
//! | [`vector_index`] | Embed-and-store facade with fallback |
//! | [`indexer`] | Index a file set |
//! | [`llm`] | Scope classifiers and answer synthesizers |
//! | [`workflow`] | Per-query state machine |
//! | [`service`] | Wiring shared by CLI and server |
//! | [`server`] | HTTP API |
//! | [`search`], [`stats`] | CLI read commands |

pub mod config;
pub mod db;
pub mod embedding;
pub mod indexer;
pub mod llm;
pub mod migrate;
pub mod repository;
pub mod search;
pub mod server;
pub mod service;
pub mod sqlite_store;
pub mod stats;
pub mod vector_index;
pub mod workflow;

pub use repo_qa_core::{chunk, history, models, timing, PipelineError, PipelineResult};
