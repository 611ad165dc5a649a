#![allow(dead_code)]

//! Ingestion pipeline for a Stellar/Soroban contract-activity indexer
//! (spec §1–§9): ordered streaming from an RPC ledger source, factory
//! deployment detection, tracked-contract activity/event/storage-change
//! extraction, per-ledger compaction, and sequential/parallel execution
//! with checkpointing.

pub mod compactor;
pub mod config;
pub mod extractor;
pub mod metrics;
pub mod orchestrator;
pub mod orderer;
pub mod pipeline;
pub mod processor;
pub mod repository;
pub mod retry;
pub mod services;
pub mod source;
pub mod streamer;
pub mod tracked_set;
pub mod worker;

pub use config::ServiceConfig;
pub use repository::Repository;
pub use source::{HttpLedgerSource, LedgerSource};
pub use streamer::{Streamer, StreamerError};
