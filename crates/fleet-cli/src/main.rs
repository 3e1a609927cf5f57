mod config;

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use fleet_core::{
    local_now_ms, FileId, Host, Lane, LaneRef, LatestFileQuery, NewCommand, NewLane, NewRevision,
    Revision, RevisionWorkId, WorkState,
};
use fleet_storage::{ArtifactStore, LeaseScheduler, Registry, WorkLedger};
use fleet_storage_sqlite::Session;

#[derive(Parser)]
#[command(name = "fleet", version)]
struct Cli {
    /// Config file (default: ./fleet.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Write a default config, create the database and register this host
    Init,
    #[command(subcommand)]
    Lane(LaneCmd),
    #[command(subcommand)]
    Host(HostCmd),
    #[command(subcommand)]
    Command(CommandCmd),
    #[command(subcommand)]
    Revision(RevisionCmd),
    #[command(subcommand)]
    Work(WorkCmd),
    #[command(subcommand)]
    File(FileCmd),
}

#[derive(Subcommand)]
enum LaneCmd {
    Add {
        name: String,
        #[arg(long, default_value = "")]
        repository: String,
        #[arg(long, default_value = "git")]
        source_control: String,
        #[arg(long, default_value = "")]
        min_revision: String,
        #[arg(long, default_value = "")]
        max_revision: String,
    },
    List,
    /// Copy a lane; hosts of the copy start disabled
    #[command(name = "clone")]
    Duplicate { master: String, name: String },
}

#[derive(Subcommand)]
enum HostCmd {
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    List,
    Enable { host: String, lane: String },
    Disable { host: String, lane: String },
}

#[derive(Subcommand)]
enum CommandCmd {
    Add {
        lane: String,
        command: String,
        #[arg(long)]
        sequence: i32,
        #[arg(long, default_value = "")]
        arguments: String,
        #[arg(long, default_value = "")]
        filename: String,
        #[arg(long)]
        always_execute: bool,
        #[arg(long)]
        non_fatal: bool,
        #[arg(long, default_value_t = 60)]
        timeout: i32,
    },
    List { lane: String },
}

#[derive(Subcommand)]
enum RevisionCmd {
    Add {
        lane: String,
        revision: String,
        #[arg(long, default_value = "")]
        author: String,
        /// Commit date in epoch milliseconds (default: now)
        #[arg(long)]
        date: Option<i64>,
    },
    List {
        lane: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct UnitArgs {
    lane: String,
    revision: String,
    /// Logical host (default: the configured host)
    #[arg(long)]
    host: Option<String>,
}

#[derive(Subcommand)]
enum WorkCmd {
    /// Lease the next unit of work for this host on a lane
    Next { lane: String },
    Renew { id: i64 },
    Complete {
        id: i64,
        #[arg(long, default_value = "success")]
        state: String,
    },
    /// Exit non-zero when a newer abandoned unit exists
    Latest { id: i64 },
    List {
        lane: String,
        #[arg(long)]
        host: Option<String>,
    },
    Clear(UnitArgs),
    Delete(UnitArgs),
}

#[derive(Subcommand)]
enum FileCmd {
    Upload {
        path: PathBuf,
        #[arg(long)]
        hidden: bool,
    },
    Download {
        id: i64,
        /// Write here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Keep the stored (compressed) bytes
        #[arg(long)]
        raw: bool,
    },
    Latest {
        lane: String,
        filename: String,
        #[arg(long)]
        completed: bool,
        #[arg(long)]
        successful: bool,
    },
}

fn load_config(root: &Path, explicit: Option<&Path>) -> Result<Config> {
    let path = explicit.map(Path::to_path_buf).unwrap_or_else(|| Config::config_path(root));
    let mut cfg = if path.exists() {
        Config::load_from(&path)?
    } else {
        Config::default_for(&default_host_name())
    };
    cfg.apply_env(|k| std::env::var(k).ok())?;
    Ok(cfg)
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

fn open_session(cfg: &Config, root: &Path) -> Result<Session> {
    let db = cfg.db_path(root);
    Session::open(&db, cfg.session_options()).with_context(|| format!("open {}", db.display()))
}

fn lane(s: &Session, name: &str) -> Result<Lane> {
    s.lookup_lane(name).with_context(|| format!("lane {name}"))
}

fn host(s: &Session, name: &str) -> Result<Host> {
    s.lookup_host(name).with_context(|| format!("host {name}"))
}

fn revision(s: &Session, lane: &Lane, name: &str) -> Result<Revision> {
    s.revisions(lane.id, None)?
        .into_iter()
        .find(|r| r.revision == name)
        .with_context(|| format!("revision {name} of lane {}", lane.name))
}

fn parse_state(s: &str) -> Result<WorkState> {
    let state = WorkState::parse(s);
    if state.as_str() != s {
        bail!("unknown state {s}");
    }
    Ok(state)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let root = std::env::current_dir()?;
    let cfg = load_config(&root, cli.config.as_deref())?;

    if let Cmd::Init = cli.cmd {
        let path = cli.config.clone().unwrap_or_else(|| Config::config_path(&root));
        if !path.exists() {
            cfg.save_to(&path)?;
        }
        let s = open_session(&cfg, &root)?;
        for name in [cfg.host.name.as_str(), cfg.workhost()] {
            if s.find_host(name)?.is_none() {
                s.create_host(name, "")?;
            }
        }
        println!("Initialized fleet database at {}", cfg.db_path(&root).display());
        return Ok(());
    }

    let s = open_session(&cfg, &root)?;
    match cli.cmd {
        Cmd::Init => {}
        Cmd::Lane(cmd) => run_lane(&s, cmd)?,
        Cmd::Host(cmd) => run_host(&s, cmd)?,
        Cmd::Command(cmd) => run_command(&s, cmd)?,
        Cmd::Revision(cmd) => run_revision(&s, cmd)?,
        Cmd::Work(cmd) => run_work(&s, &cfg, cmd)?,
        Cmd::File(cmd) => run_file(&s, cmd)?,
    }
    Ok(())
}

fn run_lane(s: &Session, cmd: LaneCmd) -> Result<()> {
    match cmd {
        LaneCmd::Add { name, repository, source_control, min_revision, max_revision } => {
            let l = s.create_lane(&NewLane { name, source_control, repository, min_revision, max_revision })?;
            println!("Added lane {} ({})", l.name, l.id);
        }
        LaneCmd::List => {
            for l in s.lanes()? {
                println!("{}\t{}\t{}", l.id, l.name, l.repository);
            }
        }
        LaneCmd::Duplicate { master, name } => {
            let m = lane(s, &master)?;
            let c = s.clone_lane(m.id, &name)?;
            println!("Cloned {} into {} ({}); hosts start disabled", m.name, c.name, c.id);
        }
    }
    Ok(())
}

fn run_host(s: &Session, cmd: HostCmd) -> Result<()> {
    match cmd {
        HostCmd::Add { name, description } => {
            let h = s.create_host(&name, &description)?;
            println!("Added host {} ({})", h.name, h.id);
        }
        HostCmd::List => {
            for h in s.hosts()? {
                let lanes: Vec<_> = s.lanes_for_host(h.id, true)?.into_iter().map(|l| l.name).collect();
                println!("{}\t{}\t{}", h.id, h.name, lanes.join(","));
            }
        }
        HostCmd::Enable { host: h, lane: l } => {
            s.set_host_lane(host(s, &h)?.id, lane(s, &l)?.id, true)?;
            println!("Enabled {h} for {l}");
        }
        HostCmd::Disable { host: h, lane: l } => {
            s.set_host_lane(host(s, &h)?.id, lane(s, &l)?.id, false)?;
            println!("Disabled {h} for {l}");
        }
    }
    Ok(())
}

fn run_command(s: &Session, cmd: CommandCmd) -> Result<()> {
    match cmd {
        CommandCmd::Add { lane: l, command, sequence, arguments, filename, always_execute, non_fatal, timeout } => {
            let l = lane(s, &l)?;
            let c = s.add_command(&NewCommand {
                lane_id: l.id,
                command,
                arguments,
                filename,
                sequence,
                always_execute,
                non_fatal,
                timeout_minutes: timeout,
            })?;
            println!("Added command {} ({}) to {}", c.command, c.id, l.name);
        }
        CommandCmd::List { lane: l } => {
            for c in s.commands(lane(s, &l)?.id)? {
                println!("{}\t{}\t{} {}", c.sequence, c.id, c.command, c.arguments);
            }
        }
    }
    Ok(())
}

fn run_revision(s: &Session, cmd: RevisionCmd) -> Result<()> {
    match cmd {
        RevisionCmd::Add { lane: l, revision, author, date } => {
            let l = lane(s, &l)?;
            let r = s.add_revision(
                l.id,
                &NewRevision { revision, author, date: date.unwrap_or_else(local_now_ms) },
            )?;
            println!("Added revision {} ({}) to {}", r.revision, r.id, l.name);
        }
        RevisionCmd::List { lane: l, limit } => {
            for r in s.revisions(lane(s, &l)?.id, limit)? {
                println!("{}\t{}\t{}", r.revision, r.date, r.author);
            }
        }
    }
    Ok(())
}

fn run_work(s: &Session, cfg: &Config, cmd: WorkCmd) -> Result<()> {
    let workhost = host(s, cfg.workhost())?;
    match cmd {
        WorkCmd::Next { lane: l } => {
            let l = lane(s, &l)?;
            let h = host(s, &cfg.host.name)?;
            let mut leased = s.get_revision_work(l.id, h.id, workhost.id)?;
            if leased.is_none() && s.allocate_revision_work(l.id, h.id)?.is_some() {
                leased = s.get_revision_work(l.id, h.id, workhost.id)?;
            }
            let Some(rw) = leased else {
                println!("no work");
                return Ok(());
            };
            let r = s.revision(rw.revision_id)?;
            let next = s.next_command(rw.id)?;
            info!(revisionwork = %rw.id, revision = %r.revision, "leased");
            let out = json!({
                "revisionwork": rw,
                "revision": r.revision,
                "next_command": next,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        WorkCmd::Renew { id } => {
            if !s.renew_lease(RevisionWorkId(id), workhost.id)? {
                bail!("lease on {id} is no longer held by {}", workhost.name);
            }
            println!("Renewed {id}");
        }
        WorkCmd::Complete { id, state } => {
            let state = parse_state(&state)?;
            if !s.complete_revision_work(RevisionWorkId(id), workhost.id, state)? {
                bail!("could not complete {id}: lease not held by {}", workhost.name);
            }
            println!("Completed {id} as {}", state.as_str());
        }
        WorkCmd::Latest { id } => {
            let rw = s.revision_work(RevisionWorkId(id))?;
            if !s.is_latest_revision_work(&rw)? {
                bail!("{id} is superseded by newer abandoned work");
            }
            println!("{id} is the latest work");
        }
        WorkCmd::List { lane: l, host: h } => {
            let l = lane(s, &l)?;
            let h = host(s, h.as_deref().unwrap_or(&cfg.host.name))?;
            for v in s.all_work(l.id, h.id)? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    v.revision,
                    v.sequence,
                    v.command,
                    v.work.state.as_str(),
                    v.work.summary
                );
            }
        }
        WorkCmd::Clear(unit) => {
            let (l, r, h) = resolve_unit(s, cfg, &unit)?;
            s.clear_work(l.id, r.id, h.id)?;
            println!("Cleared {} r{} on {}", l.name, r.revision, h.name);
        }
        WorkCmd::Delete(unit) => {
            let (l, r, h) = resolve_unit(s, cfg, &unit)?;
            let files = s.delete_files(l.id, h.id, r.id)?;
            let steps = s.delete_work(l.id, r.id, h.id)?;
            println!("Deleted {steps} steps and {files} file links of {} r{} on {}", l.name, r.revision, h.name);
        }
    }
    Ok(())
}

fn resolve_unit(s: &Session, cfg: &Config, unit: &UnitArgs) -> Result<(Lane, Revision, Host)> {
    let l = lane(s, &unit.lane)?;
    let r = revision(s, &l, &unit.revision)?;
    let h = host(s, unit.host.as_deref().unwrap_or(&cfg.host.name))?;
    Ok((l, r, h))
}

fn run_file(s: &Session, cmd: FileCmd) -> Result<()> {
    match cmd {
        FileCmd::Upload { path, hidden } => {
            let f = s.upload(&path, hidden).with_context(|| format!("upload {}", path.display()))?;
            println!("{}\t{}\t{}", f.id, f.md5, f.mime);
        }
        FileCmd::Download { id, out, raw } => {
            let f = s.file(FileId(id))?;
            let mut reader: Box<dyn std::io::Read + '_> =
                if raw { Box::new(s.download(&f)?) } else { s.open_decoded(&f)? };
            match out {
                Some(path) => {
                    let mut dest = std::fs::File::create(&path).with_context(|| format!("create {}", path.display()))?;
                    std::io::copy(&mut reader, &mut dest)?;
                }
                None => {
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    std::io::copy(&mut reader, &mut lock)?;
                    lock.flush()?;
                }
            }
        }
        FileCmd::Latest { lane: l, filename, completed, successful } => {
            let query = LatestFileQuery { lane: LaneRef::Name(l), filename, completed, successful };
            match s.find_latest_work_file(&query)? {
                Some(wf) => println!("{}\t{}", wf.file_id, wf.filename),
                None => bail!("no matching file"),
            }
        }
    }
    Ok(())
}
