//! Requirement traceability analysis
//!
//! Requirements are parsed from several sources. References between them are
//! resolved across sources, and the coverage each source receives from the
//! sources covering it is computed.

pub mod domain;
pub use domain::{
    Config, Coverage, CoverageStatus, Engine, ParseError, Provider, ProviderError,
    ProviderRegistry, Reference, Requirement, RequirementKey, RequirementLink, RequirementSource,
    SourceId,
};

/// Built-in providers that read requirements from the filesystem.
pub mod storage;
pub use storage::MarkdownProvider;
