use std::io::Read;
use std::path::Path;

use fleet_core::{
    Command, File, FileId, Host, HostId, HostLane, Lane, LaneFile, LaneHost, LaneId,
    LatestFileQuery, NewCommand, NewLane, NewRevision, Result, Revision, RevisionId, RevisionWork,
    RevisionWorkId, Work, WorkFile, WorkId, WorkState, WorkView,
};

/// Lanes, hosts, their association and the commands a lane runs.
///
/// Unique lookups return `NotFound` on zero rows and `Corruption` on more
/// than one; the `find_*` variants return `Ok(None)` instead of `NotFound`.
pub trait Registry {
    fn create_lane(&self, lane: &NewLane) -> Result<Lane>;
    fn lookup_lane(&self, name: &str) -> Result<Lane>;
    fn find_lane(&self, name: &str) -> Result<Option<Lane>>;
    fn lane(&self, id: LaneId) -> Result<Lane>;
    fn lanes(&self) -> Result<Vec<Lane>>;

    /// Copy a lane with its files, commands and (disabled) host associations.
    fn clone_lane(&self, master: LaneId, new_name: &str) -> Result<Lane>;

    fn create_host(&self, name: &str, description: &str) -> Result<Host>;
    fn lookup_host(&self, name: &str) -> Result<Host>;
    fn find_host(&self, name: &str) -> Result<Option<Host>>;
    fn host(&self, id: HostId) -> Result<Host>;
    fn hosts(&self) -> Result<Vec<Host>>;

    fn set_host_lane(&self, host: HostId, lane: LaneId, enabled: bool) -> Result<HostLane>;
    fn get_host_lane(&self, host: HostId, lane: LaneId) -> Result<Option<HostLane>>;
    fn host_lanes(&self) -> Result<Vec<HostLane>>;
    fn lanes_for_host(&self, host: HostId, only_enabled: bool) -> Result<Vec<Lane>>;
    fn hosts_for_lane(&self, lane: LaneId) -> Result<Vec<LaneHost>>;

    fn add_command(&self, command: &NewCommand) -> Result<Command>;
    /// Commands of a lane in execution order.
    fn commands(&self, lane: LaneId) -> Result<Vec<Command>>;

    fn add_lane_file(&self, lane: LaneId, name: &str, contents: &str, mime: &str) -> Result<LaneFile>;
    fn lane_files(&self, lane: LaneId) -> Result<Vec<LaneFile>>;

    /// Entry point for revision discovery. Revisions are immutable once added.
    fn add_revision(&self, lane: LaneId, revision: &NewRevision) -> Result<Revision>;
    fn revision(&self, id: RevisionId) -> Result<Revision>;
    /// Newest first by numeric revision.
    fn revisions(&self, lane: LaneId, limit: Option<usize>) -> Result<Vec<Revision>>;
    fn last_revision(&self, lane: LaneId) -> Result<i64>;
}

/// Hands out and reclaims leases on RevisionWork units.
pub trait LeaseScheduler {
    /// Insert the RevisionWork for the newest revision of the lane that has
    /// none yet for `host`.
    fn allocate_revision_work(&self, lane: LaneId, host: HostId) -> Result<Option<RevisionWork>>;
    fn find_or_create_revision_work(&self, lane: LaneId, host: HostId, revision: RevisionId) -> Result<RevisionWork>;
    fn revision_work(&self, id: RevisionWorkId) -> Result<RevisionWork>;
    fn revisions_without_work(&self, lane: LaneId, host: HostId) -> Result<Vec<Revision>>;

    /// Lease the most recent eligible unit of (lane, host) to `workhost`.
    fn get_revision_work(&self, lane: LaneId, host: HostId, workhost: HostId) -> Result<Option<RevisionWork>>;
    /// Push the deadline out by one lease period. False when the lease was lost.
    fn renew_lease(&self, id: RevisionWorkId, workhost: HostId) -> Result<bool>;
    fn complete_revision_work(&self, id: RevisionWorkId, workhost: HostId, state: WorkState) -> Result<bool>;
    /// False when a newer, expired, incomplete unit for the same pair exists.
    fn is_latest_revision_work(&self, current: &RevisionWork) -> Result<bool>;
}

/// Per-step outcomes recorded under a lease, and resets of recorded work.
pub trait WorkLedger {
    fn start_step(&self, rw: RevisionWorkId, command: &Command, workhost: HostId) -> Result<Work>;
    /// The step and file operations below fail with `LeaseNotHeld` unless
    /// `workhost` still holds the lease on the work's unit.
    fn finish_step(&self, work: WorkId, workhost: HostId, state: WorkState, summary: &str) -> Result<Work>;
    fn set_step_log(&self, work: WorkId, workhost: HostId, file: FileId) -> Result<()>;
    fn attach_file(&self, work: WorkId, workhost: HostId, file: &File, filename: Option<&str>) -> Result<WorkFile>;
    fn work_files(&self, work: WorkId) -> Result<Vec<WorkFile>>;
    /// The next command to run for a unit, honoring `always_execute` after a
    /// fatal failure.
    fn next_command(&self, rw: RevisionWorkId) -> Result<Option<Command>>;

    fn work_for_revision_work(&self, rw: RevisionWorkId) -> Result<Vec<WorkView>>;
    fn all_work(&self, lane: LaneId, host: HostId) -> Result<Vec<WorkView>>;
    fn has_work(&self, lane: LaneId, revision: RevisionId, host: HostId) -> Result<bool>;

    fn clear_all_work(&self, lane: LaneId, host: HostId) -> Result<usize>;
    fn clear_work(&self, lane: LaneId, revision: RevisionId, host: HostId) -> Result<()>;
    fn delete_files(&self, lane: LaneId, host: HostId, revision: RevisionId) -> Result<usize>;
    fn delete_work(&self, lane: LaneId, revision: RevisionId, host: HostId) -> Result<usize>;
    fn delete_all_work(&self, lane: LaneId, host: HostId) -> Result<usize>;

    fn find_latest_work_file(&self, query: &LatestFileQuery) -> Result<Option<WorkFile>>;
}

/// Deduplicated, compressed blob storage keyed by MD5.
pub trait ArtifactStore {
    type Reader<'a>: Read
    where
        Self: 'a;

    fn upload(&self, path: &Path, hidden: bool) -> Result<File>;
    fn file(&self, id: FileId) -> Result<File>;
    fn file_by_md5(&self, md5: &str) -> Result<Option<File>>;
    fn set_hidden(&self, id: FileId, hidden: bool) -> Result<()>;

    /// Forward-only stream over the stored (possibly compressed) bytes.
    fn download(&self, file: &File) -> Result<Self::Reader<'_>>;
    fn blob_size(&self, file: &File) -> Result<u64>;
    fn size_of_file(&self, id: FileId) -> Result<u64>;
}
