//! Job execution error types
//!
//! Handlers report failures with an explicit kind so the worker's three-way
//! branch (retry with backoff / fail terminally / defer) is a simple match
//! rather than broad exception catching.

use std::fmt;

/// How a handler finished a job without failing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job is fully processed and can be deleted.
    Completed,
    /// The job did not run because its input is not ready yet (e.g. the source
    /// object is not visible in storage). It is made immediately eligible
    /// again without consuming a retry attempt.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorKind {
    /// Retried according to the job's retry policy.
    Transient,
    /// Fails the job immediately; an operator must intervene to retry.
    Terminal,
}

/// Job execution error carrying a transient/terminal kind.
#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    kind: JobErrorKind,
}

impl JobError {
    /// Transient failure: network errors, temporary resource unavailability.
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Transient,
        }
    }

    /// Terminal failure: malformed payloads, input that will not change on
    /// retry, attempts exhausted.
    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            kind: JobErrorKind::Terminal,
        }
    }

    pub fn kind(&self) -> JobErrorKind {
        self.kind
    }

    pub fn is_terminal(&self) -> bool {
        self.kind == JobErrorKind::Terminal
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    /// Default conversion treats unclassified errors as transient.
    fn from(err: anyhow::Error) -> Self {
        Self::transient(err)
    }
}

/// Extension trait for Result to mark errors terminal in one call.
pub trait JobResultExt<T> {
    fn terminal(self) -> Result<T, JobError>;
    fn transient(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn terminal(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::terminal(e.into()))
    }

    fn transient(self) -> Result<T, JobError> {
        self.map_err(|e| JobError::transient(e.into()))
    }
}
