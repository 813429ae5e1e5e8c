use crate::Shell;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("cannot connect {from} to {to}: destination is already connected")]
    PlugAlreadyConnected { from: Shell, to: Shell },
    #[error("cannot connect {from} to {to}: plugs are incompatible")]
    PlugIncompatible { from: Shell, to: Shell },
    #[error("plug {0} cannot be handled in the requested mode")]
    PlugUnhandled(Shell),
    #[error(transparent)]
    Dirty(#[from] DirtyReport),
    #[error("compute failed: {0}")]
    ComputeFailed(String),
    #[error("check {0} does not implement issue fixing")]
    CheckIncompatible(Shell),
    #[error("plug {shell} is not writable: {reason}")]
    NotWritable { shell: Shell, reason: String },
    #[error("plug {0} is not connected and has no default value")]
    MissingDefault(Shell),
    #[error("plug {shell} cannot hold value {value}")]
    IncompatibleValue { shell: Shell, value: String },
    #[error("target error: {0}")]
    Target(String),
    #[error("no compatible connection found between {from} and {to}")]
    Wiring { from: String, to: String },
    #[error("process type '{0}' not found")]
    ProcessTypeNotFound(String),
    #[error("node '{0}' not found")]
    NodeNotFound(String),
    #[error("plug {0} not found")]
    PlugNotFound(Shell),
    #[error("node '{0}' already exists in workflow")]
    DuplicateNode(String),
    #[error("call graph error: {0}")]
    CallGraph(String),
    #[error("description parse error: {0}")]
    DescriptionParse(String),
    #[error("invalid description: {0}")]
    InvalidDescription(String),
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("lock poisoned: {0}")]
    Lock(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    pub fn compute_failed(reason: impl Into<String>) -> Self {
        Self::ComputeFailed(reason.into())
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self, Self::Dirty(_))
    }

    pub fn dirty_report(&self) -> Option<&DirtyReport> {
        match self {
            Self::Dirty(report) => Some(report),
            _ => None,
        }
    }
}

/// Signal raised during a dirty check when reaching the target would require
/// a mutation. Carries a printable report of what is out of date.
#[derive(Clone, Debug, Default, Error, PartialEq, Eq)]
#[error("dirty: {report}")]
pub struct DirtyReport {
    pub report: String,
}

impl DirtyReport {
    pub fn new(report: impl Into<String>) -> Self {
        Self {
            report: report.into(),
        }
    }

    pub fn make_report(&self) -> &str {
        &self.report
    }
}
