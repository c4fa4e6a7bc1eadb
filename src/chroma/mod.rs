//! Chroma Vector Database Integration
//!
//! REST client for an externally managed Chroma server and the chunk
//! collection that backs the vector index.

pub mod client;
pub mod collections;

pub use client::{ChromaClient, ChromaError};
pub use collections::{ChromaIndex, DEFAULT_COLLECTION};
