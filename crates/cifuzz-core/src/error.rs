//! Error taxonomy for the build orchestrator.
//!
//! Failures travel on two channels. [`ConfigError`] is reserved for
//! configuration-contract violations (a caller bug) and is the only error the
//! orchestrator entry point surfaces as `Err`. Everything else - unknown
//! projects, failed checkouts, failed container runs, invalid builds - is a
//! [`BuildError`] that the pipeline converts into a `false` outcome so CI
//! gets a clean status instead of a crash.

/// Configuration-contract violations. Never retried, never converted to a
/// boolean outcome.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("git SHA must not be empty")]
    EmptyGitSha,

    #[error("no revision-identifying field set (need a git SHA, PR ref, or source path)")]
    NoRevision,
}

/// Domain-level build failures. Recoverable at the pipeline boundary.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("unknown project: {0}")]
    UnknownProject(String),

    #[error("unknown repository: {0}")]
    UnknownRepo(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("container engine error: {0}")]
    Engine(String),

    #[error("filestore error: {0}")]
    Filestore(String),

    #[error("no repository checked out")]
    NoRepo,

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Either channel, as produced by revision resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Result type for domain-level build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
