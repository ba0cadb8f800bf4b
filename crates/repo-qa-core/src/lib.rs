//! # repo-qa core
//!
//! Runtime-agnostic building blocks of the repository question-answering
//! pipeline: data model, chunking, the embedding and vector-store traits,
//! chat-history normalisation, stage timings, and the error taxonomy.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Concrete
//! storage backends, model adapters and the query workflow live in the
//! `repo-qa` application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod history;
pub mod models;
pub mod store;
pub mod timing;

pub use error::{PipelineError, PipelineResult};
