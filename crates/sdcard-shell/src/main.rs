//! sdshell - interactive shell over a simulated SD card slot
//!
//! Starts `sdcard-daemon` against a simulated slot, waits for the card to
//! mount, then reads commands from stdin. The simulated card's contents live
//! in a host directory (`--mount-root`).

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sdcard_daemon::prelude::*;
use sdcard_shell::{CommandRegistry, Shell, ShellContext, builtin_commands, notice_channel};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Number of GPIO lines the simulated board exposes.
const SIM_PIN_COUNT: u8 = 40;

#[derive(Parser, Debug)]
#[command(name = "sdshell")]
#[command(about = "Interactive shell for an SD card managed by sdcard-daemon")]
#[command(version)]
struct Cli {
    /// Daemon configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Host directory backing the card's filesystem
    #[arg(long, value_name = "DIR")]
    mount_root: Option<PathBuf>,

    /// Card detect GPIO, overriding the configuration file
    #[arg(long, value_name = "PIN")]
    detect_pin: Option<u8>,

    /// Seconds to wait for the first mount before opening the prompt
    #[arg(long, default_value_t = 10)]
    wait_timeout: u64,

    /// Start with the slot empty (use `card insert` later)
    #[arg(long)]
    empty_slot: bool,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn load_config(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => DaemonConfig::default(),
        };
        if let Some(pin) = self.detect_pin {
            config.detect_pin = PinId::new(pin);
        }
        config.validate()?;
        Ok(config)
    }

    fn mount_root(&self) -> PathBuf {
        self.mount_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sdshell"))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("sdshell={log_level},sdcard_shell={log_level},sdcard_daemon={log_level}")
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let mount_root = cli.mount_root();
    std::fs::create_dir_all(&mount_root)
        .with_context(|| format!("Failed to create mount root {}", mount_root.display()))?;

    let pins = PinRegistry::new(SIM_PIN_COUNT);
    let slot = SimulatedSlot::new();
    if !cli.empty_slot {
        slot.insert();
    }

    let daemon = Arc::new(SdCardDaemon::create(
        config.clone(),
        &pins,
        slot.peripherals(config.detect_polarity),
    )?);
    let (callback, notices) = notice_channel();
    daemon.start(Some(callback))?;

    if !cli.empty_slot {
        wait_for_mount(&daemon, Duration::from_secs(cli.wait_timeout))?;
    }

    let registry = CommandRegistry::new(builtin_commands())?;
    let ctx = ShellContext::new(mount_root, Arc::clone(&daemon), Some(slot));
    let mut shell = Shell::new(registry, ctx).with_notices(notices);

    let result = shell.run(io::stdin().lock(), &mut io::stdout());
    daemon.stop();
    result.map_err(Into::into)
}

fn wait_for_mount(daemon: &SdCardDaemon, timeout: Duration) -> Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "Awaiting SD card mount...")?;
    stdout.flush()?;

    let deadline = std::time::Instant::now() + timeout;
    while !daemon.is_card_working() {
        if std::time::Instant::now() >= deadline {
            writeln!(stdout, " timed out ({})", daemon.state())?;
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    writeln!(stdout, " done.")?;
    Ok(())
}
