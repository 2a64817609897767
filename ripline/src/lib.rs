//! Ripline - Optical disc backup pipeline
//!
//! This library automates backing up DVD and Blu-ray discs through a
//! four-stage pipeline: extract, transcode, review, copy. Per-track progress
//! is recorded as marker files on disk, making the pipeline crash-tolerant
//! and open to manual operator intervention.
//!
//! # High-Level API
//!
//! ```ignore
//! use ripline::config::Settings;
//! use ripline::marker::MarkerStore;
//! use ripline::queue::QueueEngine;
//!
//! let settings = Settings::from_env();
//! let markers = MarkerStore::new(settings.paths());
//! let engine = QueueEngine::new(markers);
//!
//! // Resolve pipeline state for a (plan, track, stage) triple
//! let status = engine.queue_status(&plan, &track, Stage::Transcode).await;
//! ```

pub mod config;
pub mod drive;
pub mod exec;
pub mod logging;
pub mod marker;
pub mod metadata;
pub mod paths;
pub mod pipeline;
pub mod plan;
pub mod process;
pub mod queue;
pub mod review;
pub mod scheduler;
pub mod storage;

/// Version of the Ripline library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
