use fleet_core::{
    Command, FleetError, Host, HostId, HostLane, Lane, LaneFile, LaneHost, LaneId, NewCommand,
    NewLane, NewRevision, Result, Revision, RevisionId,
};
use fleet_storage::Registry;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::rows;
use crate::session::{expect_unique, is_unique_violation, query_list, query_unique, Session, SqlContext};

fn find_lane_in(conn: &Connection, name: &str) -> Result<Option<Lane>> {
    query_unique(conn, "SELECT * FROM lane WHERE lane = ?1", [name], "lane", name, rows::lane)
}

fn find_host_in(conn: &Connection, name: &str) -> Result<Option<Host>> {
    query_unique(conn, "SELECT * FROM host WHERE host = ?1", [name], "host", name, rows::host)
}

fn lane_in(conn: &Connection, id: LaneId) -> Result<Lane> {
    expect_unique(conn, "SELECT * FROM lane WHERE id = ?1", [id.get()], "lane", id, rows::lane)
}

fn insert_lane(conn: &Connection, lane: &NewLane) -> Result<Lane> {
    conn.execute(
        "INSERT INTO lane(lane, source_control, repository, min_revision, max_revision)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![lane.name, lane.source_control, lane.repository, lane.min_revision, lane.max_revision],
    )
    .ctx("insert lane")?;
    lane_in(conn, LaneId(conn.last_insert_rowid()))
}

impl Registry for Session {
    fn create_lane(&self, lane: &NewLane) -> Result<Lane> {
        let tx = self.begin()?;
        if find_lane_in(&tx, &lane.name)?.is_some() {
            return Err(FleetError::AlreadyExists { entity: "lane", key: lane.name.clone() });
        }
        let created = insert_lane(&tx, lane)?;
        tx.commit().ctx("commit lane")?;
        info!(lane = %created.name, id = %created.id, "created lane");
        Ok(created)
    }

    fn lookup_lane(&self, name: &str) -> Result<Lane> {
        find_lane_in(&self.conn, name)?.ok_or_else(|| FleetError::not_found("lane", name))
    }

    fn find_lane(&self, name: &str) -> Result<Option<Lane>> {
        find_lane_in(&self.conn, name)
    }

    fn lane(&self, id: LaneId) -> Result<Lane> {
        lane_in(&self.conn, id)
    }

    fn lanes(&self) -> Result<Vec<Lane>> {
        query_list(&self.conn, "SELECT * FROM lane ORDER BY lane, id", [], "list lanes", rows::lane)
    }

    fn clone_lane(&self, master: LaneId, new_name: &str) -> Result<Lane> {
        let tx = self.begin()?;
        if find_lane_in(&tx, new_name)?.is_some() {
            return Err(FleetError::AlreadyExists { entity: "lane", key: new_name.to_string() });
        }
        let src = lane_in(&tx, master)?;
        let clone = insert_lane(
            &tx,
            &NewLane {
                name: new_name.to_string(),
                source_control: src.source_control.clone(),
                repository: src.repository.clone(),
                min_revision: src.min_revision.clone(),
                max_revision: src.max_revision.clone(),
            },
        )?;

        let files = tx
            .execute(
                "INSERT INTO lanefile(lane_id, name, contents, mime)
                 SELECT ?2, name, contents, mime FROM lanefile WHERE lane_id = ?1 ORDER BY id",
                params![src.id.get(), clone.id.get()],
            )
            .ctx("copy lane files")?;
        let commands = tx
            .execute(
                "INSERT INTO command(lane_id, command, arguments, filename, sequence, alwaysexecute, nonfatal, timeout)
                 SELECT ?2, command, arguments, filename, sequence, alwaysexecute, nonfatal, timeout
                 FROM command WHERE lane_id = ?1 ORDER BY sequence, id",
                params![src.id.get(), clone.id.get()],
            )
            .ctx("copy commands")?;
        // clones start disabled; someone has to opt each host in again
        let hosts = tx
            .execute(
                "INSERT INTO hostlane(host_id, lane_id, enabled)
                 SELECT host_id, ?2, 0 FROM hostlane WHERE lane_id = ?1 ORDER BY id",
                params![src.id.get(), clone.id.get()],
            )
            .ctx("copy host lanes")?;

        tx.commit().ctx("commit lane clone")?;
        info!(master = %src.name, clone = %clone.name, files, commands, hosts, "cloned lane");
        Ok(clone)
    }

    fn create_host(&self, name: &str, description: &str) -> Result<Host> {
        let tx = self.begin()?;
        if find_host_in(&tx, name)?.is_some() {
            return Err(FleetError::AlreadyExists { entity: "host", key: name.to_string() });
        }
        tx.execute("INSERT INTO host(host, description) VALUES (?1, ?2)", params![name, description])
            .ctx("insert host")?;
        let id = HostId(tx.last_insert_rowid());
        tx.commit().ctx("commit host")?;
        info!(host = name, %id, "created host");
        self.host(id)
    }

    fn lookup_host(&self, name: &str) -> Result<Host> {
        find_host_in(&self.conn, name)?.ok_or_else(|| FleetError::not_found("host", name))
    }

    fn find_host(&self, name: &str) -> Result<Option<Host>> {
        find_host_in(&self.conn, name)
    }

    fn host(&self, id: HostId) -> Result<Host> {
        expect_unique(&self.conn, "SELECT * FROM host WHERE id = ?1", [id.get()], "host", id, rows::host)
    }

    fn hosts(&self) -> Result<Vec<Host>> {
        query_list(&self.conn, "SELECT * FROM host ORDER BY host, id", [], "list hosts", rows::host)
    }

    fn set_host_lane(&self, host: HostId, lane: LaneId, enabled: bool) -> Result<HostLane> {
        self.conn
            .execute(
                "INSERT INTO hostlane(host_id, lane_id, enabled) VALUES (?1, ?2, ?3)
                 ON CONFLICT(host_id, lane_id) DO UPDATE SET enabled = excluded.enabled",
                params![host.get(), lane.get(), enabled],
            )
            .ctx("upsert host lane")?;
        self.get_host_lane(host, lane)?
            .ok_or_else(|| FleetError::not_found("hostlane", format!("{host}/{lane}")))
    }

    fn get_host_lane(&self, host: HostId, lane: LaneId) -> Result<Option<HostLane>> {
        query_unique(
            &self.conn,
            "SELECT * FROM hostlane WHERE host_id = ?1 AND lane_id = ?2",
            [host.get(), lane.get()],
            "hostlane",
            format!("{host}/{lane}"),
            rows::host_lane,
        )
    }

    fn host_lanes(&self) -> Result<Vec<HostLane>> {
        query_list(&self.conn, "SELECT * FROM hostlane ORDER BY host_id, lane_id", [], "list host lanes", rows::host_lane)
    }

    fn lanes_for_host(&self, host: HostId, only_enabled: bool) -> Result<Vec<Lane>> {
        query_list(
            &self.conn,
            "SELECT l.* FROM lane l
             INNER JOIN hostlane hl ON hl.lane_id = l.id
             WHERE hl.host_id = ?1 AND (?2 = 0 OR hl.enabled = 1)
             ORDER BY l.lane, l.id",
            params![host.get(), only_enabled],
            "list lanes for host",
            rows::lane,
        )
    }

    fn hosts_for_lane(&self, lane: LaneId) -> Result<Vec<LaneHost>> {
        query_list(
            &self.conn,
            "SELECT h.*, hl.enabled AS hl_enabled FROM host h
             INNER JOIN hostlane hl ON hl.host_id = h.id
             WHERE hl.lane_id = ?1
             ORDER BY h.host, h.id",
            [lane.get()],
            "list hosts for lane",
            |r| Ok(LaneHost { host: rows::host(r)?, enabled: r.get("hl_enabled")? }),
        )
    }

    fn add_command(&self, command: &NewCommand) -> Result<Command> {
        self.conn
            .execute(
                "INSERT INTO command(lane_id, command, arguments, filename, sequence, alwaysexecute, nonfatal, timeout)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    command.lane_id.get(),
                    command.command,
                    command.arguments,
                    command.filename,
                    command.sequence,
                    command.always_execute,
                    command.non_fatal,
                    command.timeout_minutes,
                ],
            )
            .ctx("insert command")?;
        let id = self.conn.last_insert_rowid();
        expect_unique(&self.conn, "SELECT * FROM command WHERE id = ?1", [id], "command", id, rows::command)
    }

    fn commands(&self, lane: LaneId) -> Result<Vec<Command>> {
        query_list(
            &self.conn,
            "SELECT * FROM command WHERE lane_id = ?1 ORDER BY sequence, id",
            [lane.get()],
            "list commands",
            rows::command,
        )
    }

    fn add_lane_file(&self, lane: LaneId, name: &str, contents: &str, mime: &str) -> Result<LaneFile> {
        self.conn
            .execute(
                "INSERT INTO lanefile(lane_id, name, contents, mime) VALUES (?1, ?2, ?3, ?4)",
                params![lane.get(), name, contents, mime],
            )
            .ctx("insert lane file")?;
        let id = self.conn.last_insert_rowid();
        expect_unique(&self.conn, "SELECT * FROM lanefile WHERE id = ?1", [id], "lanefile", id, rows::lane_file)
    }

    fn lane_files(&self, lane: LaneId) -> Result<Vec<LaneFile>> {
        query_list(
            &self.conn,
            "SELECT * FROM lanefile WHERE lane_id = ?1 ORDER BY name, id",
            [lane.get()],
            "list lane files",
            rows::lane_file,
        )
    }

    fn add_revision(&self, lane: LaneId, revision: &NewRevision) -> Result<Revision> {
        let inserted = self.conn.execute(
            "INSERT INTO revision(lane_id, revision, author, date) VALUES (?1, ?2, ?3, ?4)",
            params![lane.get(), revision.revision, revision.author, revision.date],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(FleetError::AlreadyExists {
                    entity: "revision",
                    key: format!("{lane}/{}", revision.revision),
                })
            }
            Err(e) => return Err(FleetError::Transaction(format!("insert revision: {e}"))),
        }
        self.revision(RevisionId(self.conn.last_insert_rowid()))
    }

    fn revision(&self, id: RevisionId) -> Result<Revision> {
        expect_unique(&self.conn, "SELECT * FROM revision WHERE id = ?1", [id.get()], "revision", id, rows::revision)
    }

    fn revisions(&self, lane: LaneId, limit: Option<usize>) -> Result<Vec<Revision>> {
        let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
        query_list(
            &self.conn,
            "SELECT * FROM revision WHERE lane_id = ?1
             ORDER BY CAST(revision AS INTEGER) DESC, id DESC
             LIMIT ?2",
            [lane.get(), limit],
            "list revisions",
            rows::revision,
        )
    }

    fn last_revision(&self, lane: LaneId) -> Result<i64> {
        let last: Option<i64> = self
            .conn
            .query_row(
                "SELECT MAX(CAST(revision AS INTEGER)) FROM revision WHERE lane_id = ?1",
                [lane.get()],
                |r| r.get(0),
            )
            .optional()
            .ctx("last revision")?
            .flatten();
        Ok(last.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionOptions;

    fn session() -> Session {
        Session::open_in_memory(SessionOptions::default()).unwrap()
    }

    fn rev(n: &str, date: i64) -> NewRevision {
        NewRevision { revision: n.to_string(), author: "dev".to_string(), date }
    }

    #[test]
    fn lookup_distinguishes_missing_from_corrupt() {
        let s = session();
        let err = s.lookup_lane("nope").unwrap_err();
        assert!(err.is_not_found());
        assert!(s.find_lane("nope").unwrap().is_none());

        s.create_lane(&NewLane::named("main")).unwrap();
        assert_eq!(s.lookup_lane("main").unwrap().name, "main");

        // bypass create_lane to simulate a broken store
        s.conn.execute("INSERT INTO lane(lane) VALUES ('main')", []).unwrap();
        assert!(s.lookup_lane("main").unwrap_err().is_corruption());
        assert!(s.find_lane("main").unwrap_err().is_corruption());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let s = session();
        s.create_lane(&NewLane::named("main")).unwrap();
        assert!(matches!(
            s.create_lane(&NewLane::named("main")),
            Err(FleetError::AlreadyExists { entity: "lane", .. })
        ));
        s.create_host("bot1", "").unwrap();
        assert!(matches!(s.create_host("bot1", "again"), Err(FleetError::AlreadyExists { .. })));
    }

    #[test]
    fn host_lane_upsert_and_filters() {
        let s = session();
        let a = s.create_lane(&NewLane::named("a")).unwrap();
        let b = s.create_lane(&NewLane::named("b")).unwrap();
        let h = s.create_host("bot1", "linux").unwrap();

        s.set_host_lane(h.id, a.id, true).unwrap();
        s.set_host_lane(h.id, b.id, true).unwrap();
        let hl = s.set_host_lane(h.id, b.id, false).unwrap();
        assert!(!hl.enabled);
        assert_eq!(s.host_lanes().unwrap().len(), 2);

        let enabled: Vec<_> = s.lanes_for_host(h.id, true).unwrap().into_iter().map(|l| l.name).collect();
        assert_eq!(enabled, vec!["a"]);
        assert_eq!(s.lanes_for_host(h.id, false).unwrap().len(), 2);

        let hosts = s.hosts_for_lane(b.id).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].host.name, "bot1");
        assert!(!hosts[0].enabled);
    }

    #[test]
    fn commands_come_back_in_sequence_order() {
        let s = session();
        let l = s.create_lane(&NewLane::named("main")).unwrap();
        s.add_command(&NewCommand::new(l.id, "test", 20)).unwrap();
        s.add_command(&NewCommand::new(l.id, "build", 10)).unwrap();
        let mut tail = NewCommand::new(l.id, "upload", 30);
        tail.always_execute = true;
        s.add_command(&tail).unwrap();

        let cmds = s.commands(l.id).unwrap();
        let names: Vec<_> = cmds.iter().map(|c| c.command.as_str()).collect();
        assert_eq!(names, vec!["build", "test", "upload"]);
        assert!(cmds[2].always_execute);
        assert_eq!(cmds[0].timeout_minutes, 60);
    }

    #[test]
    fn revisions_order_numerically() {
        let s = session();
        let l = s.create_lane(&NewLane::named("main")).unwrap();
        assert_eq!(s.last_revision(l.id).unwrap(), 0);
        for (n, d) in [("9", 1), ("100", 2), ("20", 3)] {
            s.add_revision(l.id, &rev(n, d)).unwrap();
        }
        let revs: Vec<_> = s.revisions(l.id, None).unwrap().into_iter().map(|r| r.revision).collect();
        assert_eq!(revs, vec!["100", "20", "9"]);
        assert_eq!(s.revisions(l.id, Some(1)).unwrap().len(), 1);
        assert_eq!(s.last_revision(l.id).unwrap(), 100);

        assert!(matches!(
            s.add_revision(l.id, &rev("20", 4)),
            Err(FleetError::AlreadyExists { entity: "revision", .. })
        ));
    }

    #[test]
    fn clone_copies_children_and_disables_hosts() {
        let s = session();
        let mut master = NewLane::named("master");
        master.repository = "git://example/repo".to_string();
        master.min_revision = "10".to_string();
        let m = s.create_lane(&master).unwrap();
        let h = s.create_host("bot1", "").unwrap();
        s.set_host_lane(h.id, m.id, true).unwrap();
        s.add_command(&NewCommand::new(m.id, "build", 1)).unwrap();
        s.add_lane_file(m.id, "build.sh", "make", "text/plain").unwrap();

        let c = s.clone_lane(m.id, "copy").unwrap();
        assert_eq!(c.repository, "git://example/repo");
        assert_eq!(c.min_revision, "10");
        assert_eq!(s.commands(c.id).unwrap()[0].command, "build");
        assert_eq!(s.lane_files(c.id).unwrap()[0].contents, "make");
        let hl = s.get_host_lane(h.id, c.id).unwrap().unwrap();
        assert!(!hl.enabled);
        assert!(s.get_host_lane(h.id, m.id).unwrap().unwrap().enabled);

        assert!(matches!(s.clone_lane(m.id, "copy"), Err(FleetError::AlreadyExists { .. })));
        assert_eq!(s.lanes().unwrap().len(), 2);
    }

    #[test]
    fn clone_of_missing_master_leaves_nothing_behind() {
        let s = session();
        let err = s.clone_lane(LaneId(42), "orphan").unwrap_err();
        assert!(err.is_not_found());
        assert!(s.find_lane("orphan").unwrap().is_none());
    }
}
