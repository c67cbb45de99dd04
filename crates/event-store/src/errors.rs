use thiserror::Error;

use crate::model::RunStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EsErrorKind {
    #[error("run not found: {0}")]
    RunNotFound(String),
    #[error("run already exists: {0}")]
    RunExists(String),
    #[error("run {run_id} is closed with status {status}")]
    RunClosed { run_id: String, status: RunStatus },
    #[error("invalid status transition to {0}")]
    InvalidTransition(RunStatus),
    #[error("append rejected: {0}")]
    AppendRejected(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(transparent)]
pub struct EsError(pub EsErrorKind);

impl EsError {
    pub fn new(kind: EsErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &EsErrorKind {
        &self.0
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.0, EsErrorKind::RunNotFound(_))
    }
}

impl From<EsErrorKind> for EsError {
    fn from(kind: EsErrorKind) -> Self {
        EsError(kind)
    }
}
