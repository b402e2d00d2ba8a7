//! Error taxonomy (spec §7).
//!
//! Each component gets a concrete `thiserror` enum; `CoreError` composes
//! them at the crate boundary. Nothing here is stringly typed — callers
//! match on variants to decide retryability, HTTP status, etc.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Mutator(#[from] MutatorError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Realtime(#[from] RealtimeError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Validation errors (spec §7): precondition failures surfaced directly to
/// the caller, no task row created.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("agency {0} does not exist")]
    UnknownAgency(i64),
    #[error("feed {0} does not exist")]
    UnknownFeed(i64),
    #[error("duplicate natural key in {table}: {key}")]
    DuplicateNaturalKey { table: &'static str, key: String },
    #[error("missing reference: {0}")]
    MissingReference(String),
    #[error("upload {0} has expired or was already consumed")]
    UploadExpired(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task {0} not found")]
    NotFound(i64),
    #[error("task {0} was already cancelled")]
    AlreadyCancelled(i64),
    #[error("invalid status transition for task {task_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        task_id: i64,
        from: crate::orchestrator::TaskStatus,
        to: crate::orchestrator::TaskStatus,
    },
    #[error("external job id {0} already in use")]
    DuplicateExternalId(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Raised cooperatively when `CheckCancelled` observes `cancelled` at a
/// checkpoint (spec §4.A, §5). Never raised except at declared checkpoints.
#[derive(Debug, Error)]
#[error("task {0} was cancelled")]
pub struct CancellationError(pub i64);

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("required file(s) missing from archive: {0:?}")]
    MissingRequiredFiles(Vec<&'static str>),
    #[error("required column(s) missing in {file}: {columns:?}")]
    MissingRequiredColumns {
        file: &'static str,
        columns: Vec<String>,
    },
    #[error("archive member {0} is not valid UTF-8")]
    InvalidEncoding(String),
    #[error("archive is not a valid zip: {0}")]
    InvalidArchive(String),
    #[error("malformed CSV in {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("aborted after first error due to stop_on_error")]
    StoppedOnError,
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("failed writing archive: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed writing zip entry: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed writing CSV row: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum MutatorError {
    #[error("natural key collision on {table}: {key} (fail_on_conflict)")]
    Conflict { table: &'static str, key: String },
    #[error("feed {0} not found")]
    UnknownFeed(i64),
    #[error("agency {0} not found")]
    UnknownAgency(i64),
    #[error("no source feeds given")]
    EmptySourceSet,
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("feed {0} not found")]
    UnknownFeed(i64),
    #[error("reference validator container failed: {0}")]
    ContainerFailed(String),
    #[error("failed to parse validator report: {0}")]
    ReportParse(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
}

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("upstream rate-limited this feed source (HTTP 429)")]
    RateLimited,
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decode protobuf feed: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl RealtimeError {
    pub fn retryable(&self) -> bool {
        matches!(self, RealtimeError::RateLimited)
    }
}
