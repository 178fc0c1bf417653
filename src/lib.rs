//! Core of a distributed document-ingestion and semantic-search system:
//! parsing, chunking, embedding, vector storage, and batch orchestration.
//!
//! The HTTP control-plane surface lives in the `thoth-core` binary's
//! `server` module; this crate exposes the components it wires together.

pub mod batch_worker;
pub mod chunking;
pub mod config;
pub mod embed;
pub mod error;
pub mod incremental;
pub mod jobstore;
pub mod logging;
pub mod merger;
pub mod orchestrator;
pub mod parsers;
pub mod snapshot;
pub mod sources;
pub mod store;
pub mod taskqueue;
