//! Typed projections of store rows. Every query result is decoded here, once.

use fleet_core::{
    Command, CommandId, File, FileId, Host, HostId, HostLane, HostLaneId, Lane, LaneFile,
    LaneFileId, LaneId, ObjectId, Revision, RevisionId, RevisionWork, RevisionWorkId, Work,
    WorkFile, WorkFileId, WorkId, WorkState, WorkView,
};
use rusqlite::Row;

pub(crate) fn lane(r: &Row<'_>) -> rusqlite::Result<Lane> {
    Ok(Lane {
        id: LaneId(r.get("id")?),
        name: r.get("lane")?,
        source_control: r.get("source_control")?,
        repository: r.get("repository")?,
        min_revision: r.get("min_revision")?,
        max_revision: r.get("max_revision")?,
    })
}

pub(crate) fn host(r: &Row<'_>) -> rusqlite::Result<Host> {
    Ok(Host {
        id: HostId(r.get("id")?),
        name: r.get("host")?,
        description: r.get("description")?,
    })
}

pub(crate) fn host_lane(r: &Row<'_>) -> rusqlite::Result<HostLane> {
    Ok(HostLane {
        id: HostLaneId(r.get("id")?),
        host_id: HostId(r.get("host_id")?),
        lane_id: LaneId(r.get("lane_id")?),
        enabled: r.get("enabled")?,
    })
}

pub(crate) fn command(r: &Row<'_>) -> rusqlite::Result<Command> {
    Ok(Command {
        id: CommandId(r.get("id")?),
        lane_id: LaneId(r.get("lane_id")?),
        command: r.get("command")?,
        arguments: r.get("arguments")?,
        filename: r.get("filename")?,
        sequence: r.get("sequence")?,
        always_execute: r.get("alwaysexecute")?,
        non_fatal: r.get("nonfatal")?,
        timeout_minutes: r.get("timeout")?,
    })
}

pub(crate) fn lane_file(r: &Row<'_>) -> rusqlite::Result<LaneFile> {
    Ok(LaneFile {
        id: LaneFileId(r.get("id")?),
        lane_id: LaneId(r.get("lane_id")?),
        name: r.get("name")?,
        contents: r.get("contents")?,
        mime: r.get("mime")?,
    })
}

pub(crate) fn revision(r: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        id: RevisionId(r.get("id")?),
        lane_id: LaneId(r.get("lane_id")?),
        revision: r.get("revision")?,
        author: r.get("author")?,
        date: r.get("date")?,
    })
}

pub(crate) fn revision_work(r: &Row<'_>) -> rusqlite::Result<RevisionWork> {
    Ok(RevisionWork {
        id: RevisionWorkId(r.get("id")?),
        lane_id: LaneId(r.get("lane_id")?),
        host_id: HostId(r.get("host_id")?),
        revision_id: RevisionId(r.get("revision_id")?),
        workhost_id: r.get::<_, Option<i64>>("workhost_id")?.map(HostId),
        lock_expires: r.get("lock_expires")?,
        completed: r.get("completed")?,
        state: WorkState::parse(&r.get::<_, String>("state")?),
    })
}

pub(crate) fn work(r: &Row<'_>) -> rusqlite::Result<Work> {
    Ok(Work {
        id: WorkId(r.get("id")?),
        revisionwork_id: RevisionWorkId(r.get("revisionwork_id")?),
        command_id: CommandId(r.get("command_id")?),
        state: WorkState::parse(&r.get::<_, String>("state")?),
        summary: r.get("summary")?,
        starttime: r.get("starttime")?,
        endtime: r.get("endtime")?,
        duration_ms: r.get("duration")?,
        logfile: r.get::<_, Option<i64>>("logfile")?.map(FileId),
        host_id: r.get::<_, Option<i64>>("host_id")?.map(HostId),
    })
}

/// Expects `w.*` plus the aliased join columns selected by [`WORK_VIEW_SELECT`].
pub(crate) fn work_view(r: &Row<'_>) -> rusqlite::Result<WorkView> {
    Ok(WorkView {
        work: work(r)?,
        lane_id: LaneId(r.get("rw_lane_id")?),
        host_id: HostId(r.get("rw_host_id")?),
        command: r.get("c_command")?,
        sequence: r.get("c_sequence")?,
        non_fatal: r.get("c_nonfatal")?,
        always_execute: r.get("c_alwaysexecute")?,
        revision: r.get("r_revision")?,
        revision_date: r.get("r_date")?,
        completed: r.get("rw_completed")?,
    })
}

pub(crate) const WORK_VIEW_SELECT: &str = "SELECT w.*,
        rw.lane_id AS rw_lane_id, rw.host_id AS rw_host_id, rw.completed AS rw_completed,
        c.command AS c_command, c.sequence AS c_sequence,
        c.nonfatal AS c_nonfatal, c.alwaysexecute AS c_alwaysexecute,
        r.revision AS r_revision, r.date AS r_date
     FROM work w
     INNER JOIN revisionwork rw ON rw.id = w.revisionwork_id
     INNER JOIN command c ON c.id = w.command_id
     INNER JOIN revision r ON r.id = rw.revision_id";

pub(crate) fn work_file(r: &Row<'_>) -> rusqlite::Result<WorkFile> {
    Ok(WorkFile {
        id: WorkFileId(r.get("id")?),
        work_id: WorkId(r.get("work_id")?),
        file_id: FileId(r.get("file_id")?),
        filename: r.get("filename")?,
        hidden: r.get("hidden")?,
    })
}

pub(crate) fn file(r: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: FileId(r.get("id")?),
        md5: r.get("md5")?,
        object_id: ObjectId(r.get("object_id")?),
        size: r.get("size")?,
        mime: r.get("mime")?,
        compressed_mime: r.get("compressed_mime")?,
        hidden: r.get("hidden")?,
        filename: r.get("filename")?,
    })
}
