// SPDX-License-Identifier: MIT OR Apache-2.0

//! beri - Local retrieval-augmented policy assistant
//!
//! Embeds a fixed corpus of policy chunks once per corpus version, keeps
//! them in a local SQLite store, and answers questions by ranking chunks
//! against the query embedding and streaming a grounded answer.

pub mod assistant;
pub mod bootstrap;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod errors;
pub mod generation;
pub mod output;
pub mod retrieval;
pub mod storage;

pub use errors::{Error, Result};
