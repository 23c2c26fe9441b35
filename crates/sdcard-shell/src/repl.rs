//! Read-eval-print loop.

use std::io::{BufRead, Write};

use colored::Colorize;
use crossbeam::channel::{self, Receiver};
use sdcard_daemon::{CardEvent, Transition, TransitionCallback};

use crate::context::ShellContext;
use crate::error::{ShellError, ShellResult};
use crate::registry::{CommandRegistry, Flow};

/// Prompt printed before each line.
pub const PROMPT: &str = "sd> ";

/// Callback that forwards transitions to a channel, plus its receiving end.
///
/// The callback never blocks the daemon's background task.
#[must_use]
pub fn notice_channel() -> (TransitionCallback, Receiver<Transition>) {
    let (tx, rx) = channel::unbounded();
    let callback: TransitionCallback = Box::new(move |transition: &Transition| {
        let _ = tx.try_send(transition.clone());
    });
    (callback, rx)
}

/// One-line description of a transition.
#[must_use]
pub fn describe(transition: &Transition) -> String {
    let what = match &transition.event {
        CardEvent::Inserted => "card inserted".to_string(),
        CardEvent::Mounted => "card mounted".to_string(),
        CardEvent::MountFailed(failure) => format!("mount failed: {failure}"),
        CardEvent::Removed => "card removed".to_string(),
        CardEvent::Unmounted => "card unmounted".to_string(),
    };
    format!("[{} -> {}] {what}", transition.from, transition.to)
}

/// Interactive shell over a registry and a context.
#[derive(Debug)]
pub struct Shell {
    registry: CommandRegistry,
    ctx: ShellContext,
    notices: Option<Receiver<Transition>>,
}

impl Shell {
    /// Create a shell without transition notices.
    #[must_use]
    pub fn new(registry: CommandRegistry, ctx: ShellContext) -> Self {
        Self {
            registry,
            ctx,
            notices: None,
        }
    }

    /// Print transitions received on `notices` before each prompt.
    #[must_use]
    pub fn with_notices(mut self, notices: Receiver<Transition>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Shared command context.
    #[must_use]
    pub fn context(&self) -> &ShellContext {
        &self.ctx
    }

    /// Run a single line.
    ///
    /// # Errors
    ///
    /// Returns whatever the command returns.
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> ShellResult<Flow> {
        self.registry.dispatch(&mut self.ctx, line, out)
    }

    /// Print pending transition notices. Returns how many were printed.
    ///
    /// # Errors
    ///
    /// Fails if `out` cannot be written.
    pub fn drain_notices(&self, out: &mut dyn Write) -> ShellResult<usize> {
        let Some(notices) = &self.notices else {
            return Ok(0);
        };
        let mut printed = 0;
        for transition in notices.try_iter() {
            writeln!(out, "{}", describe(&transition).cyan()).map_err(output_error)?;
            printed += 1;
        }
        Ok(printed)
    }

    /// Read commands from `input` until `exit` or end of input.
    ///
    /// Command errors are printed and the loop continues.
    ///
    /// # Errors
    ///
    /// Fails only if `input` cannot be read or `out` cannot be written.
    pub fn run(&mut self, mut input: impl BufRead, out: &mut dyn Write) -> ShellResult<()> {
        let mut line = String::new();
        loop {
            self.drain_notices(out)?;
            write!(out, "{PROMPT}").map_err(output_error)?;
            out.flush().map_err(output_error)?;

            line.clear();
            let read = input
                .read_line(&mut line)
                .map_err(|e| ShellError::io("read", "<input>", e))?;
            if read == 0 {
                writeln!(out).map_err(output_error)?;
                return Ok(());
            }

            match self.execute(line.trim_end(), out) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return Ok(()),
                Err(e) => {
                    tracing::debug!(error = %e, "Shell command failed");
                    writeln!(out, "{} {e}", "error:".red().bold()).map_err(output_error)?;
                }
            }
        }
    }
}

fn output_error(e: std::io::Error) -> ShellError {
    ShellError::io("write", "<output>", e)
}
