use fleet_core::{
    Command, CommandId, EpochMs, File, FileId, FleetError, HostId, LaneId, LaneRef, LatestFileQuery, Result,
    RevisionId, RevisionWorkId, Work, WorkFile, WorkFileId, WorkId, WorkState, WorkView,
};
use fleet_storage::WorkLedger;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::rows::{self, WORK_VIEW_SELECT};
use crate::scheduler::{revision_work_in, NEWEST_FIRST};
use crate::session::{expect_unique, query_list, Session, SqlContext};

fn work_in(conn: &Connection, id: WorkId) -> Result<Work> {
    expect_unique(conn, "SELECT * FROM work WHERE id = ?1", [id.get()], "work", id, rows::work)
}

/// The work row, provided its unit is still leased to `workhost`.
fn held_work_in(conn: &Connection, id: WorkId, workhost: HostId, now: EpochMs) -> Result<Work> {
    let work = work_in(conn, id)?;
    let unit = revision_work_in(conn, work.revisionwork_id)?;
    if !unit.is_held_by(workhost, now) {
        return Err(FleetError::LeaseNotHeld { revisionwork: unit.id, workhost });
    }
    Ok(work)
}

fn command_in(conn: &Connection, id: CommandId) -> Result<Command> {
    expect_unique(conn, "SELECT * FROM command WHERE id = ?1", [id.get()], "command", id, rows::command)
}

/// Work rows under the (lane, revision, host) unit.
const UNIT_WORK: &str = "SELECT w.id FROM work w
     INNER JOIN revisionwork rw ON rw.id = w.revisionwork_id
     WHERE rw.lane_id = ?1 AND rw.revision_id = ?2 AND rw.host_id = ?3";

/// Work rows under every unit of the (lane, host) pair.
const PAIR_WORK: &str = "SELECT w.id FROM work w
     INNER JOIN revisionwork rw ON rw.id = w.revisionwork_id
     WHERE rw.lane_id = ?1 AND rw.host_id = ?2";

impl WorkLedger for Session {
    fn start_step(&self, rw: RevisionWorkId, command: &Command, workhost: HostId) -> Result<Work> {
        let tx = self.begin_immediate()?;
        let now = self.now();
        let unit = revision_work_in(&tx, rw)?;
        if !unit.is_held_by(workhost, now) {
            return Err(FleetError::LeaseNotHeld { revisionwork: rw, workhost });
        }
        if command.lane_id != unit.lane_id {
            return Err(FleetError::not_found("command", format!("{} in lane {}", command.id, unit.lane_id)));
        }

        tx.execute(
            "INSERT INTO work(revisionwork_id, command_id, state, summary, starttime, host_id)
             VALUES (?1, ?2, 'executing', '', ?3, ?4)
             ON CONFLICT(revisionwork_id, command_id) DO UPDATE SET
               state = 'executing', summary = '', starttime = excluded.starttime,
               endtime = NULL, duration = NULL, logfile = NULL, host_id = excluded.host_id",
            params![rw.get(), command.id.get(), now, workhost.get()],
        )
        .ctx("start step")?;
        // a failed unit stays failed while its always-execute steps run
        tx.execute(
            "UPDATE revisionwork SET state = 'executing' WHERE id = ?1 AND state = 'notdone'",
            [rw.get()],
        )
        .ctx("mark unit executing")?;
        let work = expect_unique(
            &tx,
            "SELECT * FROM work WHERE revisionwork_id = ?1 AND command_id = ?2",
            [rw.get(), command.id.get()],
            "work",
            format!("{rw}/{}", command.id),
            rows::work,
        )?;
        tx.commit().ctx("commit step start")?;
        debug!(revisionwork = %rw, command = %command.command, work = %work.id, "started step");
        Ok(work)
    }

    fn finish_step(&self, work: WorkId, workhost: HostId, state: WorkState, summary: &str) -> Result<Work> {
        let tx = self.begin_immediate()?;
        let now = self.now();
        let row = held_work_in(&tx, work, workhost, now)?;
        let duration = row.starttime.map(|start| (now - start).max(0));
        tx.execute(
            "UPDATE work SET state = ?1, summary = ?2, endtime = ?3, duration = ?4 WHERE id = ?5",
            params![state.as_str(), summary, now, duration, work.get()],
        )
        .ctx("finish step")?;

        let command = command_in(&tx, row.command_id)?;
        if state.is_failure() && !command.non_fatal {
            tx.execute(
                "UPDATE revisionwork SET state = 'failed' WHERE id = ?1",
                [row.revisionwork_id.get()],
            )
            .ctx("mark unit failed")?;
            info!(revisionwork = %row.revisionwork_id, command = %command.command, state = state.as_str(), "step failed");
        }
        let finished = work_in(&tx, work)?;
        tx.commit().ctx("commit step finish")?;
        Ok(finished)
    }

    fn set_step_log(&self, work: WorkId, workhost: HostId, file: FileId) -> Result<()> {
        let tx = self.begin_immediate()?;
        held_work_in(&tx, work, workhost, self.now())?;
        tx.execute("UPDATE work SET logfile = ?1 WHERE id = ?2", [file.get(), work.get()])
            .ctx("set step log")?;
        tx.commit().ctx("commit step log")?;
        Ok(())
    }

    fn attach_file(&self, work: WorkId, workhost: HostId, file: &File, filename: Option<&str>) -> Result<WorkFile> {
        let filename = filename.unwrap_or(&file.filename);
        let tx = self.begin_immediate()?;
        held_work_in(&tx, work, workhost, self.now())?;
        tx.execute(
            "INSERT INTO workfile(work_id, file_id, filename, hidden) VALUES (?1, ?2, ?3, ?4)",
            params![work.get(), file.id.get(), filename, file.hidden],
        )
        .ctx("attach file")?;
        let id = WorkFileId(tx.last_insert_rowid());
        let attached =
            expect_unique(&tx, "SELECT * FROM workfile WHERE id = ?1", [id.get()], "workfile", id, rows::work_file)?;
        tx.commit().ctx("commit attach file")?;
        debug!(%work, file = %file.id, filename, "attached file");
        Ok(attached)
    }

    fn work_files(&self, work: WorkId) -> Result<Vec<WorkFile>> {
        query_list(
            &self.conn,
            "SELECT * FROM workfile WHERE work_id = ?1 ORDER BY id",
            [work.get()],
            "list work files",
            rows::work_file,
        )
    }

    fn next_command(&self, rw: RevisionWorkId) -> Result<Option<Command>> {
        let unit = revision_work_in(&self.conn, rw)?;
        if unit.completed {
            return Ok(None);
        }
        let commands = query_list(
            &self.conn,
            "SELECT * FROM command WHERE lane_id = ?1 ORDER BY sequence, id",
            [unit.lane_id.get()],
            "list commands",
            rows::command,
        )?;
        let states = query_list(
            &self.conn,
            "SELECT command_id, state FROM work WHERE revisionwork_id = ?1",
            [rw.get()],
            "list step states",
            |r| Ok((CommandId(r.get(0)?), WorkState::parse(&r.get::<_, String>(1)?))),
        )?;

        let mut failed = false;
        for command in commands {
            let state = states.iter().find(|(id, _)| *id == command.id).map(|(_, s)| *s);
            match state {
                Some(s) if s.is_finished() => {
                    if s.is_failure() && !command.non_fatal {
                        failed = true;
                    }
                }
                _ if failed && !command.always_execute => {}
                _ => return Ok(Some(command)),
            }
        }
        Ok(None)
    }

    fn work_for_revision_work(&self, rw: RevisionWorkId) -> Result<Vec<WorkView>> {
        query_list(
            &self.conn,
            &format!("{WORK_VIEW_SELECT} WHERE w.revisionwork_id = ?1 ORDER BY c.sequence, c.id"),
            [rw.get()],
            "list work for revision work",
            rows::work_view,
        )
    }

    fn all_work(&self, lane: LaneId, host: HostId) -> Result<Vec<WorkView>> {
        query_list(
            &self.conn,
            &format!(
                "{WORK_VIEW_SELECT} WHERE rw.lane_id = ?1 AND rw.host_id = ?2
                 ORDER BY CAST(r.revision AS INTEGER) DESC, r.id DESC, c.sequence, c.id"
            ),
            [lane.get(), host.get()],
            "list all work",
            rows::work_view,
        )
    }

    fn has_work(&self, lane: LaneId, revision: RevisionId, host: HostId) -> Result<bool> {
        self.conn
            .query_row(
                &format!("SELECT EXISTS ({UNIT_WORK})"),
                [lane.get(), revision.get(), host.get()],
                |r| r.get(0),
            )
            .ctx("check for work")
    }

    fn clear_all_work(&self, lane: LaneId, host: HostId) -> Result<usize> {
        let tx = self.begin()?;
        let n = tx
            .execute(
                &format!("UPDATE work SET state = 'notdone', summary = '' WHERE id IN ({PAIR_WORK})"),
                [lane.get(), host.get()],
            )
            .ctx("clear all work")?;
        tx.commit().ctx("commit clear all work")?;
        info!(%lane, %host, steps = n, "cleared all work");
        Ok(n)
    }

    fn clear_work(&self, lane: LaneId, revision: RevisionId, host: HostId) -> Result<()> {
        let tx = self.begin_immediate()?;
        let steps = tx
            .execute(
                &format!(
                    "UPDATE work SET state = 'notdone', summary = '', starttime = NULL, endtime = NULL,
                       duration = NULL, logfile = NULL, host_id = NULL
                     WHERE id IN ({UNIT_WORK})"
                ),
                [lane.get(), revision.get(), host.get()],
            )
            .ctx("clear work")?;
        tx.execute(
            "UPDATE revisionwork SET state = 'notdone', lock_expires = NULL, completed = 0, workhost_id = NULL
             WHERE lane_id = ?1 AND revision_id = ?2 AND host_id = ?3",
            [lane.get(), revision.get(), host.get()],
        )
        .ctx("clear revision work")?;
        tx.commit().ctx("commit clear work")?;
        info!(%lane, %revision, %host, steps, "cleared work");
        Ok(())
    }

    fn delete_files(&self, lane: LaneId, host: HostId, revision: RevisionId) -> Result<usize> {
        let tx = self.begin()?;
        let n = tx
            .execute(
                &format!("DELETE FROM workfile WHERE work_id IN ({UNIT_WORK})"),
                [lane.get(), revision.get(), host.get()],
            )
            .ctx("delete work files")?;
        tx.commit().ctx("commit delete files")?;
        debug!(%lane, %revision, %host, files = n, "deleted work files");
        Ok(n)
    }

    fn delete_work(&self, lane: LaneId, revision: RevisionId, host: HostId) -> Result<usize> {
        let tx = self.begin()?;
        let key = [lane.get(), revision.get(), host.get()];
        tx.execute(&format!("DELETE FROM workfile WHERE work_id IN ({UNIT_WORK})"), key)
            .ctx("delete work files")?;
        let n = tx
            .execute(&format!("DELETE FROM work WHERE id IN ({UNIT_WORK})"), key)
            .ctx("delete work")?;
        tx.commit().ctx("commit delete work")?;
        info!(%lane, %revision, %host, steps = n, "deleted work");
        Ok(n)
    }

    fn delete_all_work(&self, lane: LaneId, host: HostId) -> Result<usize> {
        let tx = self.begin()?;
        let key = [lane.get(), host.get()];
        tx.execute(&format!("DELETE FROM workfile WHERE work_id IN ({PAIR_WORK})"), key)
            .ctx("delete work files")?;
        let n = tx
            .execute(&format!("DELETE FROM work WHERE id IN ({PAIR_WORK})"), key)
            .ctx("delete all work")?;
        tx.commit().ctx("commit delete all work")?;
        info!(%lane, %host, steps = n, "deleted all work");
        Ok(n)
    }

    fn find_latest_work_file(&self, query: &LatestFileQuery) -> Result<Option<WorkFile>> {
        let (lane_id, lane_name) = match &query.lane {
            LaneRef::Id(id) => (Some(id.get()), None),
            LaneRef::Name(name) => (None, Some(name.as_str())),
        };
        let sql = format!(
            "SELECT wf.* FROM workfile wf
             INNER JOIN work w ON w.id = wf.work_id
             INNER JOIN revisionwork rw ON rw.id = w.revisionwork_id
             INNER JOIN revision r ON r.id = rw.revision_id
             INNER JOIN lane l ON l.id = rw.lane_id
             WHERE wf.filename = ?1
               AND (?2 IS NULL OR l.id = ?2)
               AND (?3 IS NULL OR l.lane = ?3)
               AND (?4 = 0 OR rw.completed = 1)
               AND (?5 = 0 OR rw.state = 'success')
             ORDER BY {NEWEST_FIRST}, wf.id DESC
             LIMIT 1"
        );
        self.conn
            .query_row(
                &sql,
                params![query.filename, lane_id, lane_name, query.completed, query.successful],
                rows::work_file,
            )
            .optional()
            .ctx("find latest work file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionOptions;
    use fleet_core::{Host, Lane, NewCommand, NewLane, NewRevision, ObjectId, RevisionWork};
    use fleet_storage::{LeaseScheduler, Registry};

    struct Fixture {
        s: Session,
        lane: Lane,
        host: Host,
        build: Command,
        test: Command,
        report: Command,
    }

    fn fixture() -> Fixture {
        let s = Session::open_in_memory(SessionOptions::default()).unwrap();
        let lane = s.create_lane(&NewLane::named("main")).unwrap();
        let host = s.create_host("linux", "").unwrap();
        s.set_host_lane(host.id, lane.id, true).unwrap();
        let build = s.add_command(&NewCommand::new(lane.id, "build", 10)).unwrap();
        let test = s.add_command(&NewCommand::new(lane.id, "test", 20)).unwrap();
        let mut report = NewCommand::new(lane.id, "report", 30);
        report.always_execute = true;
        let report = s.add_command(&report).unwrap();
        Fixture { s, lane, host, build, test, report }
    }

    fn lease(f: &Fixture, revision: &str, date: i64) -> RevisionWork {
        let r = f
            .s
            .add_revision(f.lane.id, &NewRevision { revision: revision.to_string(), author: String::new(), date })
            .unwrap();
        f.s.find_or_create_revision_work(f.lane.id, f.host.id, r.id).unwrap();
        f.s.get_revision_work(f.lane.id, f.host.id, f.host.id).unwrap().unwrap()
    }

    /// A File row without a blob behind it; the ledger only needs the id.
    fn fake_file(s: &Session, md5: &str) -> File {
        s.conn.execute("INSERT INTO blob(data) VALUES (x'00')", []).unwrap();
        let object = s.conn.last_insert_rowid();
        s.conn
            .execute(
                "INSERT INTO file(md5, object_id, size, mime, filename) VALUES (?1, ?2, 1, 'text/plain', 'out.log')",
                params![md5, object],
            )
            .unwrap();
        File {
            id: FileId(s.conn.last_insert_rowid()),
            md5: md5.to_string(),
            object_id: ObjectId(object),
            size: 1,
            mime: "text/plain".to_string(),
            compressed_mime: None,
            hidden: false,
            filename: "out.log".to_string(),
        }
    }

    #[test]
    fn steps_run_in_order_and_failures_skip_to_always_execute() {
        let f = fixture();
        let rw = lease(&f, "1", 1);
        assert_eq!(f.s.next_command(rw.id).unwrap().unwrap().id, f.build.id);

        let w = f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        assert_eq!(w.state, WorkState::Executing);
        assert_eq!(f.s.revision_work(rw.id).unwrap().state, WorkState::Executing);
        // an executing step is offered again, it has not finished
        assert_eq!(f.s.next_command(rw.id).unwrap().unwrap().id, f.build.id);

        let done = f.s.finish_step(w.id, f.host.id, WorkState::Failed, "compile error").unwrap();
        assert_eq!(done.summary, "compile error");
        assert!(done.endtime.is_some());
        assert!(done.duration_ms.unwrap() >= 0);
        assert_eq!(f.s.revision_work(rw.id).unwrap().state, WorkState::Failed);

        assert_eq!(f.s.next_command(rw.id).unwrap().unwrap().id, f.report.id);
        let w = f.s.start_step(rw.id, &f.report, f.host.id).unwrap();
        f.s.finish_step(w.id, f.host.id, WorkState::Success, "").unwrap();
        assert!(f.s.next_command(rw.id).unwrap().is_none());
        assert_eq!(f.s.revision_work(rw.id).unwrap().state, WorkState::Failed);
    }

    #[test]
    fn nonfatal_failure_keeps_going() {
        let s = Session::open_in_memory(SessionOptions::default()).unwrap();
        let lane = s.create_lane(&NewLane::named("main")).unwrap();
        let host = s.create_host("h", "").unwrap();
        s.set_host_lane(host.id, lane.id, true).unwrap();
        let mut lint = NewCommand::new(lane.id, "lint", 1);
        lint.non_fatal = true;
        let lint = s.add_command(&lint).unwrap();
        let build = s.add_command(&NewCommand::new(lane.id, "build", 2)).unwrap();
        let r = s.add_revision(lane.id, &NewRevision { revision: "1".into(), author: String::new(), date: 1 }).unwrap();
        s.find_or_create_revision_work(lane.id, host.id, r.id).unwrap();
        let rw = s.get_revision_work(lane.id, host.id, host.id).unwrap().unwrap();

        let w = s.start_step(rw.id, &lint, host.id).unwrap();
        s.finish_step(w.id, host.id, WorkState::Failed, "style").unwrap();
        assert_eq!(s.revision_work(rw.id).unwrap().state, WorkState::Executing);
        assert_eq!(s.next_command(rw.id).unwrap().unwrap().id, build.id);
    }

    #[test]
    fn steps_need_the_lease() {
        let f = fixture();
        let rw = lease(&f, "1", 1);
        let other = f.s.create_host("other", "").unwrap();
        let err = f.s.start_step(rw.id, &f.build, other.id).unwrap_err();
        assert!(matches!(err, FleetError::LeaseNotHeld { .. }));
        assert!(!f.s.has_work(f.lane.id, rw.revision_id, f.host.id).unwrap());
    }

    #[test]
    fn results_need_the_lease() {
        let f = fixture();
        let rw = lease(&f, "1", 1);
        let w = f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        let other = f.s.create_host("other", "").unwrap();
        let log = fake_file(&f.s, "dd");

        let err = f.s.finish_step(w.id, other.id, WorkState::Failed, "not mine").unwrap_err();
        assert!(matches!(err, FleetError::LeaseNotHeld { .. }));
        assert!(matches!(f.s.set_step_log(w.id, other.id, log.id), Err(FleetError::LeaseNotHeld { .. })));
        assert!(matches!(f.s.attach_file(w.id, other.id, &log, None), Err(FleetError::LeaseNotHeld { .. })));
        assert_eq!(f.s.revision_work(rw.id).unwrap().state, WorkState::Executing);

        f.s.complete_revision_work(rw.id, f.host.id, WorkState::Success).unwrap();
        let err = f.s.finish_step(w.id, f.host.id, WorkState::Success, "late").unwrap_err();
        assert!(matches!(err, FleetError::LeaseNotHeld { .. }));
        let step = &f.s.work_for_revision_work(rw.id).unwrap()[0].work;
        assert_eq!(step.state, WorkState::Executing);
        assert_eq!(step.logfile, None);
    }

    #[test]
    fn views_join_command_and_revision() {
        let f = fixture();
        let rw = lease(&f, "7", 70);
        let w = f.s.start_step(rw.id, &f.test, f.host.id).unwrap();
        f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        let log = fake_file(&f.s, "aa");
        f.s.set_step_log(w.id, f.host.id, log.id).unwrap();

        let views = f.s.work_for_revision_work(rw.id).unwrap();
        let names: Vec<_> = views.iter().map(|v| v.command.as_str()).collect();
        assert_eq!(names, vec!["build", "test"]);
        assert_eq!(views[1].work.logfile, Some(log.id));
        assert_eq!(views[1].revision, "7");
        assert_eq!(views[1].revision_date, 70);
        assert_eq!(views[1].host_id, f.host.id);
        assert!(!views[1].completed);

        assert_eq!(f.s.all_work(f.lane.id, f.host.id).unwrap().len(), 2);
        assert!(f.s.has_work(f.lane.id, rw.revision_id, f.host.id).unwrap());
        assert!(f.s.set_step_log(WorkId(999), f.host.id, log.id).unwrap_err().is_not_found());
    }

    #[test]
    fn clear_work_resets_unit_and_steps() {
        let f = fixture();
        let rw = lease(&f, "1", 1);
        let w = f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        f.s.finish_step(w.id, f.host.id, WorkState::Success, "ok").unwrap();
        f.s.complete_revision_work(rw.id, f.host.id, WorkState::Success).unwrap();

        f.s.clear_work(f.lane.id, rw.revision_id, f.host.id).unwrap();
        let unit = f.s.revision_work(rw.id).unwrap();
        assert!(!unit.completed);
        assert_eq!(unit.workhost_id, None);
        assert_eq!(unit.lock_expires, None);
        assert_eq!(unit.state, WorkState::NotDone);
        let step = &f.s.work_for_revision_work(rw.id).unwrap()[0].work;
        assert_eq!(step.state, WorkState::NotDone);
        assert_eq!(step.summary, "");
        assert_eq!(step.starttime, None);
        assert_eq!(step.host_id, None);
    }

    #[test]
    fn clear_all_work_only_touches_state_and_summary() {
        let f = fixture();
        let rw = lease(&f, "1", 1);
        let w = f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        f.s.finish_step(w.id, f.host.id, WorkState::Failed, "boom").unwrap();

        assert_eq!(f.s.clear_all_work(f.lane.id, f.host.id).unwrap(), 1);
        let step = &f.s.work_for_revision_work(rw.id).unwrap()[0].work;
        assert_eq!(step.state, WorkState::NotDone);
        assert_eq!(step.summary, "");
        assert!(step.starttime.is_some());
        assert_eq!(f.s.revision_work(rw.id).unwrap().workhost_id, Some(f.host.id));
    }

    #[test]
    fn deletes_remove_files_before_steps() {
        let f = fixture();
        let rw = lease(&f, "1", 1);
        let w = f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        let file = fake_file(&f.s, "bb");
        f.s.attach_file(w.id, f.host.id, &file, Some("build.log")).unwrap();
        f.s.attach_file(w.id, f.host.id, &file, None).unwrap();
        let names: Vec<_> = f.s.work_files(w.id).unwrap().into_iter().map(|wf| wf.filename).collect();
        assert_eq!(names, vec!["build.log", "out.log"]);

        assert_eq!(f.s.delete_files(f.lane.id, f.host.id, rw.revision_id).unwrap(), 2);
        assert!(f.s.work_files(w.id).unwrap().is_empty());

        f.s.attach_file(w.id, f.host.id, &file, None).unwrap();
        assert_eq!(f.s.delete_work(f.lane.id, rw.revision_id, f.host.id).unwrap(), 1);
        assert!(!f.s.has_work(f.lane.id, rw.revision_id, f.host.id).unwrap());
        // the file itself is shared and survives
        assert_eq!(f.s.conn.query_row("SELECT COUNT(*) FROM file", [], |r| r.get::<_, i64>(0)).unwrap(), 1);

        f.s.start_step(rw.id, &f.build, f.host.id).unwrap();
        f.s.start_step(rw.id, &f.test, f.host.id).unwrap();
        assert_eq!(f.s.delete_all_work(f.lane.id, f.host.id).unwrap(), 2);
    }

    #[test]
    fn latest_work_file_honours_predicates() {
        let f = fixture();
        let file = fake_file(&f.s, "cc");

        let old = lease(&f, "1", 100);
        let w = f.s.start_step(old.id, &f.build, f.host.id).unwrap();
        let old_wf = f.s.attach_file(w.id, f.host.id, &file, Some("app.zip")).unwrap();
        f.s.complete_revision_work(old.id, f.host.id, WorkState::Success).unwrap();

        let new = lease(&f, "2", 200);
        let w = f.s.start_step(new.id, &f.build, f.host.id).unwrap();
        let new_wf = f.s.attach_file(w.id, f.host.id, &file, Some("app.zip")).unwrap();

        let mut q = LatestFileQuery {
            lane: LaneRef::Name("main".to_string()),
            filename: "app.zip".to_string(),
            completed: false,
            successful: false,
        };
        assert_eq!(f.s.find_latest_work_file(&q).unwrap().unwrap().id, new_wf.id);

        q.completed = true;
        assert_eq!(f.s.find_latest_work_file(&q).unwrap().unwrap().id, old_wf.id);

        f.s.complete_revision_work(new.id, f.host.id, WorkState::Failed).unwrap();
        q.lane = LaneRef::Id(f.lane.id);
        assert_eq!(f.s.find_latest_work_file(&q).unwrap().unwrap().id, new_wf.id);
        q.successful = true;
        assert_eq!(f.s.find_latest_work_file(&q).unwrap().unwrap().id, old_wf.id);

        q.filename = "missing.zip".to_string();
        assert!(f.s.find_latest_work_file(&q).unwrap().is_none());
        q.filename = "app.zip".to_string();
        q.lane = LaneRef::Name("other".to_string());
        assert!(f.s.find_latest_work_file(&q).unwrap().is_none());
    }
}
