use std::path::PathBuf;

use thiserror::Error;

use crate::{HostId, RevisionWorkId};

pub type Result<T, E = FleetError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FleetError {
    /// A lookup by a unique key matched nothing.
    #[error("could not find the {entity} '{key}'")]
    NotFound { entity: &'static str, key: String },

    /// A supposedly unique key matched more than one row.
    #[error("found more than one {entity} for '{key}' (store is corrupt)")]
    Corruption { entity: &'static str, key: String },

    #[error("{entity} '{key}' already exists")]
    AlreadyExists { entity: &'static str, key: String },

    #[error("{} is {size} bytes, the upload limit is {limit} bytes", path.display())]
    SizeLimit { path: PathBuf, size: u64, limit: u64 },

    /// A concurrent insert won the race for the same key; retry the lookup.
    #[error("concurrent insert of {entity} '{key}'")]
    Conflict { entity: &'static str, key: String },

    #[error("revision work {revisionwork} is not leased to host {workhost}")]
    LeaseNotHeld { revisionwork: RevisionWorkId, workhost: HostId },

    #[error("could not read the store clock: {0}")]
    Clock(String),

    #[error("{0} is not supported on download streams")]
    Unsupported(&'static str),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        FleetError::NotFound { entity, key: key.to_string() }
    }

    pub fn corruption(entity: &'static str, key: impl ToString) -> Self {
        FleetError::Corruption { entity, key: key.to_string() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound { .. })
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, FleetError::Corruption { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FleetError::Conflict { .. })
    }
}
