//! Built-in requirement providers.

pub mod directory;
/// Markdown serialization for requirements.
pub mod markdown;

pub use directory::MarkdownProvider;
pub use markdown::{LoadError, MarkdownReference, MarkdownRequirement};
