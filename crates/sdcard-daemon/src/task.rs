//! Background task running the mount lifecycle.
//!
//! The worker thread is spawned at create time and parks until it receives
//! [`Control::Start`]. Once started it loops: wait for a wake or the poll
//! timeout, check the stop flag, run one [`MountLifecycle::step`]. A stop
//! request is only observed between steps, so an in-flight mount or unmount
//! always completes.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use portable_atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

use crate::config::{DaemonConfig, MAX_TASK_PRIORITY};
use crate::detect::{Wake, WakeReceiver};
use crate::error::{DaemonError, DaemonResult};
use crate::lifecycle::MountLifecycle;
use crate::state::TransitionCallback;

/// Message from the daemon handle to a parked worker.
pub(crate) enum Control {
    /// Install the callback, arm the interrupt and enter the main loop.
    Start {
        callback: Option<TransitionCallback>,
        reply: Sender<DaemonResult<()>>,
    },
    /// Exit without ever starting.
    Shutdown,
}

/// Handles kept by the daemon for a spawned worker.
pub(crate) struct WorkerHandle {
    pub(crate) control: Sender<Control>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) join: JoinHandle<()>,
}

/// Spawn the worker thread, parked until started.
pub(crate) fn spawn(
    config: &DaemonConfig,
    lifecycle: MountLifecycle,
    wake: WakeReceiver,
) -> DaemonResult<WorkerHandle> {
    let (control_tx, control_rx) = channel::bounded(1);
    let stop = Arc::new(AtomicBool::new(false));
    let worker = Worker {
        lifecycle,
        wake,
        control: control_rx,
        stop: Arc::clone(&stop),
        priority: config.task_priority,
    };

    let join = thread::Builder::new()
        .name(config.task_name.clone())
        .stack_size(config.task_stack_size)
        .spawn(move || worker.run())
        .map_err(|e| DaemonError::task_spawn(e.to_string()))?;

    debug!(
        task = %config.task_name,
        stack_size = config.task_stack_size,
        priority = config.task_priority,
        "Background task spawned"
    );
    Ok(WorkerHandle {
        control: control_tx,
        stop,
        join,
    })
}

struct Worker {
    lifecycle: MountLifecycle,
    wake: WakeReceiver,
    control: Receiver<Control>,
    stop: Arc<AtomicBool>,
    priority: u8,
}

impl Worker {
    fn run(mut self) {
        apply_priority(self.priority);
        if self.wait_for_start() {
            self.main_loop();
        }
        self.lifecycle.shutdown();
        debug!("Background task exited");
    }

    /// Block until started. Returns `false` if asked to exit instead.
    fn wait_for_start(&mut self) -> bool {
        loop {
            match self.control.recv() {
                Ok(Control::Start { callback, reply }) => {
                    self.lifecycle.set_callback(callback);
                    match self.lifecycle.arm() {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                            return true;
                        }
                        Err(err) => {
                            warn!(error = %err, "Card detect interrupt setup failed");
                            self.lifecycle.set_callback(None);
                            let pin = self.lifecycle.detect_pin();
                            let _ = reply.send(Err(DaemonError::interrupt_setup(pin, err.to_string())));
                        }
                    }
                }
                Ok(Control::Shutdown) | Err(_) => return false,
            }
        }
    }

    fn main_loop(&mut self) {
        info!("SD card daemon running");
        let mut next_wait = Duration::ZERO;
        loop {
            if self.wake.wait(next_wait) == Wake::Notified {
                trace!("Woken by detect edge");
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            next_wait = self.lifecycle.step();
        }
        info!(state = %self.lifecycle.state(), "SD card daemon stopping");
    }
}

/// Map a 0..=24 task priority onto a Linux nice value (19..=-20).
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn nice_for(priority: u8) -> i32 {
    let priority = i32::from(priority.min(MAX_TASK_PRIORITY));
    19 - priority * 39 / i32::from(MAX_TASK_PRIORITY)
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn apply_priority(priority: u8) {
    let nice = nice_for(priority);
    // SAFETY: gettid has no preconditions and setpriority only reads its
    // integer arguments.
    let tid = unsafe { libc::gettid() };
    let Ok(who) = libc::id_t::try_from(tid) else {
        return;
    };
    // SAFETY: see above; `who` is this thread's id.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, who, nice) };
    if rc != 0 {
        // Raising priority needs CAP_SYS_NICE; run at the inherited one.
        warn!(
            priority,
            nice,
            error = %std::io::Error::last_os_error(),
            "Could not apply task priority"
        );
    } else {
        debug!(priority, nice, "Task priority applied");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(priority: u8) {
    debug!(priority, "Task priority not supported on this platform");
}
