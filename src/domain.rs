//! Domain models for traceability analysis.
//!
//! This module contains the requirement and source data model, the provider
//! seam used by parsers, the configuration, and the analysis engine.

/// Requirement domain model.
pub mod requirement;
pub use requirement::{Reference, Requirement, RequirementKey, RequirementLink};

mod source;
pub use source::{Coverage, CoverageStatus, RequirementSource, SourceId};

pub mod provider;
pub use provider::{FnProvider, NullProvider, Provider, ProviderError, ProviderRegistry};

mod config;
pub use config::{Config, ConfigError, SourceConfig};

pub mod engine;
pub use engine::{Engine, ParseError, SourceFailure};
