use fleet_core::{
    HostId, LaneId, Result, Revision, RevisionId, RevisionWork, RevisionWorkId, WorkState,
};
use fleet_storage::LeaseScheduler;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::rows;
use crate::session::{expect_unique, query_list, query_unique, Session, SqlContext};

/// Newest revision first. Commit dates can tie, so the numeric revision and
/// then the row id break ties deterministically.
pub(crate) const NEWEST_FIRST: &str = "r.date DESC, CAST(r.revision AS INTEGER) DESC, r.id DESC";

pub(crate) fn revision_work_in(conn: &Connection, id: RevisionWorkId) -> Result<RevisionWork> {
    expect_unique(
        conn,
        "SELECT * FROM revisionwork WHERE id = ?1",
        [id.get()],
        "revisionwork",
        id,
        rows::revision_work,
    )
}

fn revision_work_for(conn: &Connection, lane: LaneId, host: HostId, revision: RevisionId) -> Result<RevisionWork> {
    expect_unique(
        conn,
        "SELECT * FROM revisionwork WHERE lane_id = ?1 AND host_id = ?2 AND revision_id = ?3",
        [lane.get(), host.get(), revision.get()],
        "revisionwork",
        format!("{lane}/{host}/{revision}"),
        rows::revision_work,
    )
}

fn insert_revision_work(conn: &Connection, lane: LaneId, host: HostId, revision: RevisionId) -> Result<RevisionWork> {
    // the unique triple makes a concurrent allocation a no-op
    conn.execute(
        "INSERT OR IGNORE INTO revisionwork(lane_id, host_id, revision_id) VALUES (?1, ?2, ?3)",
        [lane.get(), host.get(), revision.get()],
    )
    .ctx("insert revision work")?;
    revision_work_for(conn, lane, host, revision)
}

impl LeaseScheduler for Session {
    fn allocate_revision_work(&self, lane: LaneId, host: HostId) -> Result<Option<RevisionWork>> {
        let tx = self.begin_immediate()?;
        let lane_row = expect_unique(&tx, "SELECT * FROM lane WHERE id = ?1", [lane.get()], "lane", lane, rows::lane)?;
        let (min, max) = lane_row.revision_bounds();

        let sql = format!(
            "SELECT r.* FROM revision r
             WHERE r.lane_id = ?1
               AND NOT EXISTS (SELECT 1 FROM revisionwork rw
                               WHERE rw.lane_id = ?1 AND rw.host_id = ?2 AND rw.revision_id = r.id)
               AND (?3 IS NULL OR CAST(r.revision AS INTEGER) >= ?3)
               AND (?4 IS NULL OR CAST(r.revision AS INTEGER) <= ?4)
             ORDER BY {NEWEST_FIRST}
             LIMIT 1"
        );
        let candidate = tx
            .query_row(&sql, params![lane.get(), host.get(), min, max], rows::revision)
            .optional()
            .ctx("pick unallocated revision")?;
        let Some(revision) = candidate else {
            debug!(%lane, %host, "every revision already has work");
            return Ok(None);
        };

        let rw = insert_revision_work(&tx, lane, host, revision.id)?;
        tx.commit().ctx("commit allocation")?;
        info!(%lane, %host, revision = %revision.revision, revisionwork = %rw.id, "allocated revision work");
        Ok(Some(rw))
    }

    fn find_or_create_revision_work(&self, lane: LaneId, host: HostId, revision: RevisionId) -> Result<RevisionWork> {
        let tx = self.begin_immediate()?;
        let rw = insert_revision_work(&tx, lane, host, revision)?;
        tx.commit().ctx("commit revision work")?;
        Ok(rw)
    }

    fn revision_work(&self, id: RevisionWorkId) -> Result<RevisionWork> {
        revision_work_in(&self.conn, id)
    }

    fn revisions_without_work(&self, lane: LaneId, host: HostId) -> Result<Vec<Revision>> {
        query_list(
            &self.conn,
            "SELECT r.* FROM revision r
             WHERE r.lane_id = ?1
               AND NOT EXISTS (SELECT 1 FROM revisionwork rw
                               WHERE rw.lane_id = ?1 AND rw.host_id = ?2 AND rw.revision_id = r.id)
             ORDER BY CAST(r.revision AS INTEGER) DESC, r.id DESC",
            [lane.get(), host.get()],
            "list revisions without work",
            rows::revision,
        )
    }

    fn get_revision_work(&self, lane: LaneId, host: HostId, workhost: HostId) -> Result<Option<RevisionWork>> {
        let tx = self.begin_immediate()?;
        let now = self.now();

        let pair = query_unique(
            &tx,
            "SELECT * FROM hostlane WHERE host_id = ?1 AND lane_id = ?2",
            [host.get(), lane.get()],
            "hostlane",
            format!("{host}/{lane}"),
            rows::host_lane,
        )?;
        if !pair.is_some_and(|hl| hl.enabled) {
            debug!(%lane, %host, "host is not enabled for lane");
            return Ok(None);
        }

        let sql = format!(
            "SELECT rw.* FROM revisionwork rw
             INNER JOIN revision r ON r.id = rw.revision_id
             WHERE rw.lane_id = ?1 AND rw.host_id = ?2 AND rw.completed = 0
               AND (rw.workhost_id IS NULL OR rw.workhost_id = ?3
                    OR rw.lock_expires IS NULL OR rw.lock_expires < ?4)
             ORDER BY {NEWEST_FIRST}
             LIMIT 1"
        );
        let candidate = tx
            .query_row(&sql, params![lane.get(), host.get(), workhost.get(), now], rows::revision_work)
            .optional()
            .ctx("pick revision work")?;
        let Some(rw) = candidate else {
            debug!(%lane, %host, %workhost, "no eligible revision work");
            return Ok(None);
        };

        if rw.is_held_by(workhost, now) {
            debug!(revisionwork = %rw.id, %workhost, "lease already held");
            return Ok(Some(rw));
        }

        let deadline = self.lease_deadline(now);
        tx.execute(
            "UPDATE revisionwork SET workhost_id = ?1, lock_expires = ?2 WHERE id = ?3",
            params![workhost.get(), deadline, rw.id.get()],
        )
        .ctx("claim revision work")?;
        let leased = revision_work_in(&tx, rw.id)?;
        tx.commit().ctx("commit lease")?;

        match rw.workhost_id {
            Some(prev) if prev != workhost => {
                info!(revisionwork = %rw.id, previous = %prev, %workhost, lock_expires = deadline, "reclaimed expired lease")
            }
            _ => info!(revisionwork = %rw.id, %workhost, lock_expires = deadline, "granted lease"),
        }
        Ok(Some(leased))
    }

    fn renew_lease(&self, id: RevisionWorkId, workhost: HostId) -> Result<bool> {
        let deadline = self.lease_deadline(self.now());
        let changed = self
            .conn
            .execute(
                "UPDATE revisionwork SET lock_expires = ?1
                 WHERE id = ?2 AND workhost_id = ?3 AND completed = 0",
                params![deadline, id.get(), workhost.get()],
            )
            .ctx("renew lease")?;
        if changed == 0 {
            warn!(revisionwork = %id, %workhost, "lease lost, not renewed");
            return Ok(false);
        }
        debug!(revisionwork = %id, %workhost, lock_expires = deadline, "renewed lease");
        Ok(true)
    }

    fn complete_revision_work(&self, id: RevisionWorkId, workhost: HostId, state: WorkState) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE revisionwork SET completed = 1, state = ?1
                 WHERE id = ?2 AND workhost_id = ?3 AND completed = 0",
                params![state.as_str(), id.get(), workhost.get()],
            )
            .ctx("complete revision work")?;
        if changed == 0 {
            warn!(revisionwork = %id, %workhost, "not completed: lease not held or already complete");
            return Ok(false);
        }
        info!(revisionwork = %id, %workhost, state = state.as_str(), "completed revision work");
        Ok(true)
    }

    fn is_latest_revision_work(&self, current: &RevisionWork) -> Result<bool> {
        let newer: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM revisionwork rw
                 INNER JOIN revision r ON r.id = rw.revision_id
                 INNER JOIN revision cur ON cur.id = ?3
                 WHERE rw.lane_id = ?1 AND rw.host_id = ?2 AND rw.id <> ?4
                   AND rw.completed = 0
                   AND rw.lock_expires IS NOT NULL AND rw.lock_expires < ?5
                   AND (r.date, CAST(r.revision AS INTEGER), r.id)
                       > (cur.date, CAST(cur.revision AS INTEGER), cur.id)",
                params![
                    current.lane_id.get(),
                    current.host_id.get(),
                    current.revision_id.get(),
                    current.id.get(),
                    self.now(),
                ],
                |r| r.get(0),
            )
            .ctx("check for newer revision work")?;
        if newer > 0 {
            debug!(revisionwork = %current.id, newer, "superseded by newer expired work");
        }
        Ok(newer == 0)
    }
}
