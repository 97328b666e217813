//! Shared types, error model, and configuration for Briefwise.
//!
//! This crate is the foundation depended on by all other Briefwise crates.
//! It provides:
//! - [`BriefwiseError`], the unified error type
//! - Domain types ([`JobId`], [`JobStatus`], [`ProgressEvent`], [`JobSnapshot`])
//! - Configuration ([`AppConfig`], config loading)
//! - Tracing setup ([`telemetry::init_tracing`])

pub mod config;
pub mod error;
pub mod telemetry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EngineConfig, LlmConfig, LogFormat, LoggingConfig, PipelineConfig,
    ResearchConfig, StorageBackend, StorageConfig, Topology, config_dir, config_file_path,
    init_config, load_config, load_config_from, resolve_api_key, validate_api_key,
};
pub use error::{BriefwiseError, Result};
pub use types::{EventStatus, JobId, JobSnapshot, JobStatus, ProgressEvent, SYSTEM_AGENT};
