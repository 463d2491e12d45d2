//! Cognitive middleware sitting between an IDE and a frontier LLM API:
//! enriches requests with local context, runs candidates through a
//! hardened sandbox, retries within a bounded attempt budget, and
//! emits an attestation manifest only for a proven-passing candidate.

pub mod api;
pub mod attestation;
pub mod classifier;
pub mod config;
pub mod context;
pub mod fingerprint;
pub mod llm;
pub mod model;
pub mod orchestrator;
pub mod sandbox;
pub mod tier;
