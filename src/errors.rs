//! Snapbook Error Handling
//!
//! A single error enum covers every engine failure mode. Each variant is a
//! `miette` diagnostic with a stable code so the CLI can render it with help
//! text, while library callers match on the variant directly.
//!
//! ## Scope of each error
//!
//! - `MissingDependency`, `ResourceExhausted` and `ExecutionFault` are fatal to a
//!   single unit. The executor converts them into failing unit results.
//! - `CircularOrMissingDependency` is fatal to the whole run.
//! - Registration errors (`DuplicateUnit`, `UnknownDependency`, `ArityMismatch`,
//!   `UnsupportedArity`) are reported before any unit executes.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Error type returned by unit bodies and hooks.
pub type UnitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SnapbookError>;

/// Unified error type for all Snapbook engine failure modes.
#[derive(Debug, Error, Diagnostic)]
pub enum SnapbookError {
    #[error("Missing dependency: unit '{unit}' requires '{dependency}', which produced no value")]
    #[diagnostic(
        code(snapbook::dependency::missing),
        help("make sure the dependency passes, or run it once so its return value is recorded")
    )]
    MissingDependency { unit: String, dependency: String },

    #[error("Circular or missing dependency: no unit can be scheduled among [{}]", .units.join(", "))]
    #[diagnostic(
        code(snapbook::dependency::circular),
        help("check the dependency lists of the listed units for a cycle")
    )]
    CircularOrMissingDependency { units: Vec<String> },

    #[error("Unknown dependency: unit '{unit}' depends on '{dependency}', which is not registered")]
    #[diagnostic(code(snapbook::registration::unknown_dependency))]
    UnknownDependency { unit: String, dependency: String },

    #[error("Resource exhausted: no free {resource} in range {base}..={max}")]
    #[diagnostic(code(snapbook::resource::exhausted))]
    ResourceExhausted {
        resource: String,
        base: u16,
        max: u16,
    },

    #[error("Unsupported arity: unit '{unit}' declares {count} dependencies (at most 3 are supported)")]
    #[diagnostic(code(snapbook::registration::arity))]
    UnsupportedArity { unit: String, count: usize },

    #[error("Arity mismatch: unit '{unit}' declares {declared} dependencies but its body accepts {accepted}")]
    #[diagnostic(code(snapbook::registration::arity_mismatch))]
    ArityMismatch {
        unit: String,
        declared: usize,
        accepted: usize,
    },

    #[error("Duplicate unit: '{name}' is registered twice in suite '{suite}'")]
    #[diagnostic(code(snapbook::registration::duplicate))]
    DuplicateUnit { suite: String, name: String },

    #[error("Execution fault in '{unit}': {message}")]
    #[diagnostic(code(snapbook::execution::fault))]
    ExecutionFault { unit: String, message: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    #[diagnostic(code(snapbook::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error ({context}): {source}")]
    #[diagnostic(code(snapbook::serialization))]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl SnapbookError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wraps a serde_json error with a short description of what was being (de)serialized.
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// True for errors that abort the whole run rather than a single unit.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            SnapbookError::CircularOrMissingDependency { .. }
                | SnapbookError::UnknownDependency { .. }
                | SnapbookError::DuplicateUnit { .. }
                | SnapbookError::ArityMismatch { .. }
                | SnapbookError::UnsupportedArity { .. }
        )
    }
}

/// Extracts a readable message from a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unit panicked with a non-string payload".to_string()
    }
}
