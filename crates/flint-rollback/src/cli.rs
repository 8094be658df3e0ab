//! `flint-rollback` admin command line.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flint_core::{ArenaId, RecordSubject};

use crate::admin::{self, ArenaLog, ArenaStatus, DiscardReport};
use crate::config::Config;
use crate::paths::{self, DataRoot};
use crate::service::RollbackService;
use crate::store_lock::{self, UnlockOutcome};
use crate::{Error, Result};

#[derive(Parser, Debug)]
#[command(
    name = "flint-rollback",
    version,
    about = "Inspect and retire pending arena rollback logs",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Machine-readable JSON output.
    #[arg(long, global = true)]
    pub json: bool,

    /// Data root holding rollback.sqlite and rollback_state.json.
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List arenas with a pending log or state group.
    Status,
    /// Print an arena's pending records.
    Show {
        #[arg(value_parser = parse_arena)]
        arena: ArenaId,
    },
    /// Drop an arena's log and state group without replaying them.
    Discard {
        #[arg(value_parser = parse_arena)]
        arena: ArenaId,
    },
    /// Remove a data root lock left behind by a crashed host.
    Unlock {
        /// Remove the lock even when its holder may still be running.
        #[arg(long)]
        force: bool,
    },
}

fn parse_arena(raw: &str) -> std::result::Result<ArenaId, String> {
    ArenaId::new(raw).map_err(|e| e.to_string())
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

pub fn run(cli: Cli, config: &Config) -> Result<()> {
    let dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| paths::data_dir(config.paths.data_dir.as_deref()));
    let root = DataRoot::new(dir);
    let mut out = std::io::stdout().lock();

    // Unlocking must not take the lock it is about to inspect.
    if let Command::Unlock { force } = cli.command {
        let outcome = store_lock::unlock(&root, force)?;
        return if cli.json {
            print_json(&mut out, &outcome)
        } else {
            render_unlock(&mut out, &outcome)
        };
    }

    let service = RollbackService::open_at(root, &config.store)?;
    let records = service.records();
    let states = service.states();

    match &cli.command {
        Command::Unlock { .. } => Ok(()),
        Command::Status => {
            let rows = admin::status(records.as_ref(), states.as_ref())?;
            if cli.json {
                print_json(&mut out, &rows)
            } else {
                render_status(&mut out, &rows)
            }
        }
        Command::Show { arena } => {
            let log = admin::show(records.as_ref(), states.as_ref(), arena)?;
            if cli.json {
                print_json(&mut out, &log)
            } else {
                render_log(&mut out, &log)
            }
        }
        Command::Discard { arena } => {
            let report = admin::discard(records.as_ref(), states.as_ref(), arena)?;
            if cli.json {
                print_json(&mut out, &report)
            } else {
                render_discard(&mut out, &report)
            }
        }
    }
}

fn print_json<T: serde::Serialize>(out: &mut impl Write, value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(crate::store::StoreError::from)?;
    writeln!(out, "{rendered}").map_err(stdout_error)
}

fn stdout_error(source: std::io::Error) -> Error {
    Error::Store(crate::store::StoreError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    })
}

fn render_status(out: &mut impl Write, rows: &[ArenaStatus]) -> Result<()> {
    if rows.is_empty() {
        return writeln!(out, "no pending rollback logs").map_err(stdout_error);
    }
    for row in rows {
        let records = row
            .records
            .map_or_else(|| "no log".to_string(), |n| format!("{n} records"));
        writeln!(out, "{:<24} {:>12}  {} state blobs", row.arena, records, row.state_blobs)
            .map_err(stdout_error)?;
    }
    Ok(())
}

fn render_log(out: &mut impl Write, log: &ArenaLog) -> Result<()> {
    writeln!(out, "arena {} ({} records)", log.arena, log.records.len()).map_err(stdout_error)?;
    for shown in &log.records {
        let record = &shown.record;
        let detail = match &record.subject {
            RecordSubject::Block(block) => {
                format!("block {} {}:{}", block.pos, block.type_tag, block.aux_data)
            }
            RecordSubject::EntityCreation(created) => format!("created {}", created.entity_id),
            RecordSubject::EntityChange(changed) => {
                format!("changed {} {}", changed.entity_id, changed.type_tag)
            }
        };
        let state = match (&shown.state, record.has_state()) {
            (Some(_), _) => " +state",
            (None, true) => " (state missing)",
            (None, false) => "",
        };
        writeln!(out, "{:>6}  {}  {detail}{state}", record.id(), record.world())
            .map_err(stdout_error)?;
    }
    for id in &log.corrupt {
        writeln!(out, "{id:>6}  <corrupt>").map_err(stdout_error)?;
    }
    Ok(())
}

fn render_discard(out: &mut impl Write, report: &DiscardReport) -> Result<()> {
    if !report.had_log && report.state_blobs == 0 {
        return writeln!(out, "arena {} had nothing pending", report.arena).map_err(stdout_error);
    }
    writeln!(
        out,
        "discarded {} records and {} state blobs for arena {}",
        report.records, report.state_blobs, report.arena
    )
    .map_err(stdout_error)
}

fn render_unlock(out: &mut impl Write, outcome: &UnlockOutcome) -> Result<()> {
    let holder = |pid: Option<u32>| pid.map_or_else(|| "unknown holder".to_string(), |p| format!("pid {p}"));
    match outcome {
        UnlockOutcome::NotLocked => writeln!(out, "data root is not locked"),
        UnlockOutcome::Removed {
            reason,
            forced,
            holder: h,
        } => {
            let how = if *forced { "forcibly removed" } else { "removed" };
            writeln!(
                out,
                "{how} lock of {} ({})",
                holder(h.as_ref().map(|h| h.pid)),
                reason.as_str()
            )
        }
        UnlockOutcome::Refused { reason, holder: h } => writeln!(
            out,
            "lock of {} kept ({}); rerun with --force to remove it",
            holder(h.as_ref().map(|h| h.pid)),
            reason.as_str()
        ),
    }
    .map_err(stdout_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = parse_from(["flint-rollback", "show", "arena1", "--json", "-vv"]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Show { ref arena } if arena.as_str() == "arena1"));
    }

    #[test]
    fn rejects_invalid_arena_ids() {
        let result = Cli::try_parse_from(["flint-rollback", "discard", "bad id"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_unlock_force() {
        let cli = parse_from(["flint-rollback", "unlock", "--force"]);
        assert!(matches!(cli.command, Command::Unlock { force: true }));
        let cli = parse_from(["flint-rollback", "unlock"]);
        assert!(matches!(cli.command, Command::Unlock { force: false }));
    }

    #[test]
    fn unlock_runs_against_a_held_root_without_opening_it() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = DataRoot::new(temp.path());
        let lock = crate::store_lock::DataRootLock::acquire(&root).unwrap();
        let data_dir = temp.path().to_str().unwrap();

        // Our own pid is alive, so the lock is kept without --force.
        let cli = parse_from(["flint-rollback", "unlock", "--data-dir", data_dir]);
        run(cli, &Config::default()).unwrap();
        assert!(store_lock::read_lock_holder(&root).unwrap().is_some());

        let cli = parse_from(["flint-rollback", "unlock", "--force", "--data-dir", data_dir]);
        run(cli, &Config::default()).unwrap();
        assert!(store_lock::read_lock_holder(&root).unwrap().is_none());
        drop(lock);
    }

    #[test]
    fn refused_unlock_names_the_holder() {
        let mut buf = Vec::new();
        render_unlock(
            &mut buf,
            &UnlockOutcome::Refused {
                reason: store_lock::UnlockReason::HolderAlive,
                holder: Some(store_lock::LockHolder {
                    pid: 42,
                    started_at_ms: 0,
                    version: "0.3.0".into(),
                }),
            },
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("pid 42"));
        assert!(text.contains("--force"));
    }

    #[test]
    fn status_renders_rows() {
        let mut buf = Vec::new();
        render_status(
            &mut buf,
            &[ArenaStatus {
                arena: ArenaId::new("arena1").unwrap(),
                records: Some(3),
                state_blobs: 1,
            }],
        )
        .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("arena1"));
        assert!(text.contains("3 records"));
    }
}
