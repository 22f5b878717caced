//! # Parley
//!
//! A console retrieval-augmented chat agent.
//!
//! Two halves share one SQLite database:
//!
//! - **Ingestion/retrieval** — local documents (PDF, PowerPoint, plain text)
//!   are extracted, chunked with overlap, embedded, and written to a vector
//!   index ([`ingest`], [`chunk`], [`extract`], [`embedding`], [`index`],
//!   [`retrieval`]).
//! - **Chat** — an interactive session streams completions with function
//!   calling ([`chat`], [`completion`], [`tools`]); the persisted transcript
//!   is kept inside the model's context window by summarizing older turns
//!   ([`reducer`], [`tokens`], [`store`]).
//!
//! The `parley` binary in `src/main.rs` wires these together behind a CLI.

pub mod chat;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod reducer;
pub mod retrieval;
pub mod store;
pub mod tokens;
pub mod tools;
