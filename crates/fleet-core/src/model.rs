use serde::{Deserialize, Serialize};

use crate::{
    clock::EpochMs, types::WorkState, CommandId, FileId, HostId, HostLaneId, LaneFileId, LaneId,
    ObjectId, RevisionId, RevisionWorkId, WorkFileId, WorkId,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lane {
    pub id: LaneId,
    pub name: String,
    pub source_control: String,
    pub repository: String,
    pub min_revision: String,
    pub max_revision: String,
}

impl Lane {
    /// Numeric revision bounds; an empty or non-numeric bound is open.
    pub fn revision_bounds(&self) -> (Option<i64>, Option<i64>) {
        (
            self.min_revision.trim().parse().ok(),
            self.max_revision.trim().parse().ok(),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewLane {
    pub name: String,
    pub source_control: String,
    pub repository: String,
    pub min_revision: String,
    pub max_revision: String,
}

impl NewLane {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_control: "git".to_string(),
            repository: String::new(),
            min_revision: String::new(),
            max_revision: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostLane {
    pub id: HostLaneId,
    pub host_id: HostId,
    pub lane_id: LaneId,
    pub enabled: bool,
}

/// A host configured for a lane, as listed from the lane's side.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneHost {
    pub host: Host,
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub lane_id: LaneId,
    pub command: String,
    pub arguments: String,
    pub filename: String,
    pub sequence: i32,
    pub always_execute: bool,
    pub non_fatal: bool,
    pub timeout_minutes: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewCommand {
    pub lane_id: LaneId,
    pub command: String,
    pub arguments: String,
    pub filename: String,
    pub sequence: i32,
    pub always_execute: bool,
    pub non_fatal: bool,
    pub timeout_minutes: i32,
}

impl NewCommand {
    pub fn new(lane_id: LaneId, command: impl Into<String>, sequence: i32) -> Self {
        Self {
            lane_id,
            command: command.into(),
            arguments: String::new(),
            filename: String::new(),
            sequence,
            always_execute: false,
            non_fatal: false,
            timeout_minutes: 60,
        }
    }
}

/// Inline file attached to a lane's configuration (scripts, environment).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaneFile {
    pub id: LaneFileId,
    pub lane_id: LaneId,
    pub name: String,
    pub contents: String,
    pub mime: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    pub lane_id: LaneId,
    pub revision: String,
    pub author: String,
    pub date: EpochMs,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewRevision {
    pub revision: String,
    pub author: String,
    pub date: EpochMs,
}

/// The lease and unit of work for one (lane, host, revision).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionWork {
    pub id: RevisionWorkId,
    pub lane_id: LaneId,
    pub host_id: HostId,
    pub revision_id: RevisionId,
    pub workhost_id: Option<HostId>,
    pub lock_expires: Option<EpochMs>,
    pub completed: bool,
    pub state: WorkState,
}

impl RevisionWork {
    pub fn lease_expired(&self, now: EpochMs) -> bool {
        self.lock_expires.map_or(true, |t| t < now)
    }

    /// True when `workhost` owns an unexpired lease on this unit.
    pub fn is_held_by(&self, workhost: HostId, now: EpochMs) -> bool {
        !self.completed && self.workhost_id == Some(workhost) && !self.lease_expired(now)
    }
}

/// Execution record of one command under one RevisionWork.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Work {
    pub id: WorkId,
    pub revisionwork_id: RevisionWorkId,
    pub command_id: CommandId,
    pub state: WorkState,
    pub summary: String,
    pub starttime: Option<EpochMs>,
    pub endtime: Option<EpochMs>,
    pub duration_ms: Option<i64>,
    pub logfile: Option<FileId>,
    pub host_id: Option<HostId>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkFile {
    pub id: WorkFileId,
    pub work_id: WorkId,
    pub file_id: FileId,
    pub filename: String,
    pub hidden: bool,
}

/// Content-addressed blob metadata. Only `hidden` may change after insert.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct File {
    pub id: FileId,
    pub md5: String,
    pub object_id: ObjectId,
    pub size: i64,
    pub mime: String,
    pub compressed_mime: Option<String>,
    pub hidden: bool,
    pub filename: String,
}

/// One step joined with its command and revision, for listing work.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkView {
    pub work: Work,
    pub lane_id: LaneId,
    pub host_id: HostId,
    pub command: String,
    pub sequence: i32,
    pub non_fatal: bool,
    pub always_execute: bool,
    pub revision: String,
    pub revision_date: EpochMs,
    pub completed: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LaneRef {
    Id(LaneId),
    Name(String),
}

/// Predicate for the "latest artifact" lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LatestFileQuery {
    pub lane: LaneRef,
    pub filename: String,
    pub completed: bool,
    pub successful: bool,
}
