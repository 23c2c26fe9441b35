//! Explicit command registry.
//!
//! Commands are described by plain [`CommandSpec`] values and collected into
//! a [`CommandRegistry`] once at startup. Each line is tokenized and its
//! arguments are parsed by the command's `clap` schema before the handler
//! runs.

use std::collections::BTreeMap;
use std::io::Write;

use clap::error::ErrorKind;
use clap::{ArgMatches, Command};

use crate::context::ShellContext;
use crate::error::{ShellError, ShellResult};
use crate::tokenizer::tokenize;

/// What the REPL does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line.
    Continue,
    /// Leave the REPL.
    Exit,
}

/// Everything a handler gets besides the context.
pub struct Invocation<'a> {
    /// Parsed arguments.
    pub matches: &'a ArgMatches,
    /// The registry, for commands that describe other commands.
    pub registry: &'a CommandRegistry,
    /// Where output goes.
    pub out: &'a mut dyn Write,
}

/// Command handler.
pub type Handler = fn(&mut ShellContext, Invocation<'_>) -> ShellResult<Flow>;

/// Descriptor for one command.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    /// Name typed at the prompt.
    pub name: &'static str,
    /// One-line help text.
    pub about: &'static str,
    /// Argument schema. The returned command is renamed to `name`.
    pub args: fn() -> Command,
    /// Handler invoked with the parsed arguments.
    pub handler: Handler,
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("about", &self.about)
            .finish_non_exhaustive()
    }
}

/// Registry of shell commands, keyed by name.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, CommandSpec>,
}

impl CommandRegistry {
    /// Build a registry from descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::DuplicateCommand`] if two specs share a name.
    pub fn new(specs: impl IntoIterator<Item = CommandSpec>) -> ShellResult<Self> {
        let mut registry = Self::default();
        for spec in specs {
            registry.add(spec)?;
        }
        Ok(registry)
    }

    /// Add one descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::DuplicateCommand`] if the name is taken.
    pub fn add(&mut self, spec: CommandSpec) -> ShellResult<()> {
        if self.commands.contains_key(spec.name) {
            return Err(ShellError::DuplicateCommand(spec.name));
        }
        self.commands.insert(spec.name, spec);
        Ok(())
    }

    /// Look up a command.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Registered commands in name order.
    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    /// Number of registered commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Check if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Parse and run one input line.
    ///
    /// Blank lines do nothing. `--help` output from `clap` is written to
    /// `out` rather than treated as an error.
    ///
    /// # Errors
    ///
    /// Returns tokenizer, lookup, usage and handler errors.
    pub fn dispatch(
        &self,
        ctx: &mut ShellContext,
        line: &str,
        out: &mut dyn Write,
    ) -> ShellResult<Flow> {
        let words = tokenize(line)?;
        let Some(name) = words.first() else {
            return Ok(Flow::Continue);
        };
        let spec = self
            .get(name)
            .ok_or_else(|| ShellError::UnknownCommand(name.clone()))?;

        let command = (spec.args)().name(spec.name).about(spec.about);
        let matches = match command.try_get_matches_from(&words) {
            Ok(matches) => matches,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                write!(out, "{}", e.render()).map_err(|e| ShellError::io("write", "<stdout>", e))?;
                return Ok(Flow::Continue);
            }
            Err(e) => return Err(ShellError::Usage(e.render().to_string())),
        };

        tracing::debug!(command = spec.name, "Running shell command");
        (spec.handler)(
            ctx,
            Invocation {
                matches: &matches,
                registry: self,
                out,
            },
        )
    }
}
