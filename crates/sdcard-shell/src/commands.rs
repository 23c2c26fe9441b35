//! Built-in shell commands.

use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use colored::Colorize;
use sdcard_daemon::sim::Medium;

use crate::context::ShellContext;
use crate::error::{ShellError, ShellResult};
use crate::fs_utils::{EntryKind, OpenMode, SECTOR_SIZE};
use crate::registry::{CommandSpec, Flow, Invocation};

macro_rules! outln {
    ($out:expr, $($arg:tt)*) => {
        writeln!($out, $($arg)*).map_err(|e| ShellError::io("write", "<output>", e))?
    };
}

/// Every command the shell ships with.
#[must_use]
pub fn builtin_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "ls",
            about: "list everything under given path",
            args: ls_args,
            handler: ls,
        },
        CommandSpec {
            name: "cat",
            about: "print a file",
            args: cat_args,
            handler: cat,
        },
        CommandSpec {
            name: "mkdir",
            about: "create a directory",
            args: mkdir_args,
            handler: mkdir,
        },
        CommandSpec {
            name: "write",
            about: "write text to a file and sync it",
            args: write_args,
            handler: write,
        },
        CommandSpec {
            name: "touch",
            about: "set a file's modification time to now",
            args: touch_args,
            handler: touch,
        },
        CommandSpec {
            name: "status",
            about: "show card state, readiness and daemon counters",
            args: status_args,
            handler: status,
        },
        CommandSpec {
            name: "card",
            about: "control the simulated card slot",
            args: card_args,
            handler: card,
        },
        CommandSpec {
            name: "help",
            about: "list commands",
            args: Command::default,
            handler: help,
        },
        CommandSpec {
            name: "exit",
            about: "leave the shell",
            args: Command::default,
            handler: exit,
        },
    ]
}

fn path_arg(help: &'static str) -> Arg {
    Arg::new("path").value_name("PATH").required(true).help(help)
}

fn path(matches: &ArgMatches) -> &str {
    matches.get_one::<String>("path").map_or("/", String::as_str)
}

fn format_mtime(modified: Option<SystemTime>) -> String {
    modified.map_or_else(
        || "-".to_string(),
        |t| DateTime::<Local>::from(t).format("%F_%T").to_string(),
    )
}

fn ls_args() -> Command {
    Command::default().arg(
        Arg::new("path")
            .value_name("PATH")
            .default_value("/")
            .help("path to list"),
    )
}

fn ls(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    for entry in ctx.fs.read_dir(path(inv.matches))? {
        let entry = entry?;
        if entry.kind == EntryKind::File {
            outln!(
                inv.out,
                "name='{}' type={} size={} mtim={}",
                entry.name,
                entry.kind.as_str(),
                entry.size,
                format_mtime(entry.modified)
            );
        } else {
            outln!(inv.out, "name='{}' type={}", entry.name, entry.kind.as_str());
        }
    }
    Ok(Flow::Continue)
}

fn cat_args() -> Command {
    Command::default().arg(path_arg("file to print"))
}

fn cat(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    let content = ctx.fs.read_to_string(path(inv.matches))?;
    if content.ends_with('\n') || content.is_empty() {
        write!(inv.out, "{content}").map_err(|e| ShellError::io("write", "<output>", e))?;
    } else {
        outln!(inv.out, "{content}");
    }
    Ok(Flow::Continue)
}

fn mkdir_args() -> Command {
    Command::default()
        .arg(path_arg("directory to create"))
        .arg(
            Arg::new("parents")
                .short('p')
                .long("parents")
                .action(ArgAction::SetTrue)
                .help("create missing parent directories"),
        )
}

fn mkdir(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    let target = path(inv.matches);
    if inv.matches.get_flag("parents") {
        let created = ctx.fs.mkdir_parts(&[target])?;
        outln!(inv.out, "created {created}");
    } else {
        ctx.fs.mkdir(target)?;
        outln!(inv.out, "created {target}");
    }
    Ok(Flow::Continue)
}

fn write_args() -> Command {
    Command::default()
        .arg(path_arg("file to write"))
        .arg(
            Arg::new("text")
                .value_name("TEXT")
                .required(true)
                .num_args(1..)
                .help("text to write, words joined by spaces"),
        )
        .arg(
            Arg::new("append")
                .short('a')
                .long("append")
                .action(ArgAction::SetTrue)
                .help("append instead of truncating"),
        )
}

fn write(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    let mut text = inv
        .matches
        .get_many::<String>("text")
        .map(|words| words.map(String::as_str).collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    text.push('\n');
    let mode = if inv.matches.get_flag("append") {
        OpenMode::Append
    } else {
        OpenMode::Write
    };
    let target = path(inv.matches);
    ctx.fs.write_all_synced(target, text.as_bytes(), mode)?;
    outln!(inv.out, "wrote {} bytes to {target}", text.len());
    Ok(Flow::Continue)
}

fn touch_args() -> Command {
    Command::default().arg(path_arg("file to touch"))
}

fn touch(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    ctx.fs.touch_mtime(path(inv.matches), SystemTime::now())?;
    Ok(Flow::Continue)
}

fn status_args() -> Command {
    Command::default().arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("print machine-readable JSON"),
    )
}

fn status(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    let daemon = &ctx.daemon;
    let state = daemon.state();
    let ready = daemon.is_card_working();
    let m = daemon.metrics();
    let free_bytes = if ready {
        match ctx.fs.free_space_bytes() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::debug!(error = %e, "Free space query failed");
                None
            }
        }
    } else {
        None
    };

    if inv.matches.get_flag("json") {
        let doc = serde_json::json!({
            "state": state.to_string(),
            "ready": ready,
            "detect_pin": daemon.detect_pin().number(),
            "mount_root": ctx.fs.root().display().to_string(),
            "free_bytes": free_bytes,
            "free_sectors": free_bytes.map(|b| b / SECTOR_SIZE),
            "metrics": {
                "inserts": m.inserts,
                "removals": m.removals,
                "mount_attempts": m.mount_attempts,
                "mounts": m.mounts,
                "mount_failures": m.mount_failures,
                "formats": m.formats,
                "unmount_errors": m.unmount_errors,
                "spurious_changes": m.spurious_changes,
            },
        });
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| ShellError::Usage(format!("failed to format status: {e}")))?;
        outln!(inv.out, "{text}");
        return Ok(Flow::Continue);
    }

    let ready_text = if ready { "yes".green() } else { "no".red() };
    outln!(inv.out, "{} {}", "state:".bold(), state);
    outln!(inv.out, "{} {}", "ready:".bold(), ready_text);
    outln!(inv.out, "{} {}", "detect pin:".bold(), daemon.detect_pin());
    outln!(inv.out, "{} {}", "mount root:".bold(), ctx.fs.root().display());
    match free_bytes {
        Some(bytes) => outln!(
            inv.out,
            "{} {bytes} bytes ({} sectors)",
            "free space:".bold(),
            bytes / SECTOR_SIZE
        ),
        None => outln!(inv.out, "{} -", "free space:".bold()),
    }
    outln!(
        inv.out,
        "inserts={} removals={} mount_attempts={} mounts={} mount_failures={}",
        m.inserts,
        m.removals,
        m.mount_attempts,
        m.mounts,
        m.mount_failures
    );
    outln!(
        inv.out,
        "formats={} unmount_errors={} spurious_changes={}",
        m.formats,
        m.unmount_errors,
        m.spurious_changes
    );
    Ok(Flow::Continue)
}

fn card_args() -> Command {
    Command::default()
        .subcommand_required(true)
        .subcommand(Command::new("insert").about("seat a card"))
        .subcommand(Command::new("remove").about("pull the card"))
        .subcommand(
            Command::new("bounce")
                .about("chatter the detect switch")
                .arg(
                    Arg::new("count")
                        .value_name("N")
                        .required(true)
                        .value_parser(value_parser!(u32))
                        .help("number of edges"),
                )
                .arg(
                    Arg::new("period-ms")
                        .long("period-ms")
                        .default_value("2")
                        .value_parser(value_parser!(u64))
                        .help("milliseconds between edges"),
                ),
        )
        .subcommand(
            Command::new("medium")
                .about("choose what the next card carries")
                .arg(
                    Arg::new("kind")
                        .required(true)
                        .value_parser(["formatted", "unformatted", "corrupt"]),
                ),
        )
}

fn card(ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    let slot = ctx.slot.as_ref().ok_or(ShellError::NoSimulator)?;
    match inv.matches.subcommand() {
        Some(("insert", _)) => {
            slot.insert();
            outln!(inv.out, "card inserted");
        }
        Some(("remove", _)) => {
            slot.remove();
            outln!(inv.out, "card removed");
        }
        Some(("bounce", args)) => {
            let count = args.get_one::<u32>("count").copied().unwrap_or(0);
            let period = args.get_one::<u64>("period-ms").copied().unwrap_or(2);
            slot.schedule_bounce(count, Duration::from_millis(period));
            outln!(inv.out, "scheduled {count} edges {period}ms apart");
        }
        Some(("medium", args)) => {
            let medium = match args.get_one::<String>("kind").map(String::as_str) {
                Some("unformatted") => Medium::Unformatted,
                Some("corrupt") => Medium::Corrupt,
                _ => Medium::Formatted,
            };
            slot.set_medium(medium);
            outln!(inv.out, "medium set to {medium:?}");
        }
        _ => return Err(ShellError::Usage("card: missing subcommand".into())),
    }
    Ok(Flow::Continue)
}

fn help(_ctx: &mut ShellContext, inv: Invocation<'_>) -> ShellResult<Flow> {
    let width = inv.registry.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for spec in inv.registry.iter() {
        outln!(inv.out, "  {:width$}  {}", spec.name, spec.about);
    }
    outln!(inv.out, "Use '<command> --help' for arguments.");
    Ok(Flow::Continue)
}

fn exit(_ctx: &mut ShellContext, _inv: Invocation<'_>) -> ShellResult<Flow> {
    Ok(Flow::Exit)
}
