//! Interactive shell for the card mounted by `sdcard-daemon`.
//!
//! Commands are registered explicitly as [`CommandSpec`] values, parsed with
//! `clap`, and run against a [`ShellContext`]. File commands go through
//! [`CardFs`], which refuses to touch the mount root while the daemon reports
//! the card as not ready.
//!
//! ```no_run
//! use std::sync::Arc;
//! use sdcard_shell::{CommandRegistry, Shell, ShellContext, builtin_commands};
//! # fn demo(daemon: Arc<sdcard_daemon::SdCardDaemon>) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CommandRegistry::new(builtin_commands())?;
//! let mut shell = Shell::new(registry, ShellContext::new("/sdcard", daemon, None));
//! shell.run(std::io::stdin().lock(), &mut std::io::stdout())?;
//! # Ok(())
//! # }
//! ```

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

pub mod commands;
pub mod context;
pub mod error;
pub mod fs_utils;
pub mod registry;
pub mod repl;
pub mod tokenizer;

pub use commands::builtin_commands;
pub use context::ShellContext;
pub use error::{ShellError, ShellResult};
pub use fs_utils::{CardFs, DirEntryInfo, DirIter, EntryKind, OpenMode, SECTOR_SIZE};
pub use registry::{CommandRegistry, CommandSpec, Flow, Handler, Invocation};
pub use repl::{PROMPT, Shell, describe, notice_channel};
pub use tokenizer::tokenize;
