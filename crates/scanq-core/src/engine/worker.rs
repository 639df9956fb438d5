//! Background thread driving the scheduler.
//!
//! The worker loops between channel commands and timed ticks, so enqueue
//! and observer changes stay responsive while a job is waiting out a
//! backoff. One worker per scheduler; the scheduler itself is never
//! shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::Scheduler;
use crate::job::Job;
use crate::observer::Observer;

pub enum EngineCommand {
    Enqueue(Job),
    Attach(Box<dyn Observer>),
    Detach,
    Shutdown,
}

/// Control handle for a spawned worker. Sends are fire-and-forget; a
/// worker that already exited simply ignores them.
pub struct EngineHandle {
    tx: Sender<EngineCommand>,
    thread: JoinHandle<Scheduler>,
}

impl EngineHandle {
    pub fn enqueue(&self, job: Job) {
        let _ = self.tx.send(EngineCommand::Enqueue(job));
    }

    pub fn attach(&self, observer: Box<dyn Observer>) {
        let _ = self.tx.send(EngineCommand::Attach(observer));
    }

    pub fn detach(&self) {
        let _ = self.tx.send(EngineCommand::Detach);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown);
    }

    /// Waits for the worker to stop and returns the scheduler it drove.
    pub fn join(self) -> Option<Scheduler> {
        self.thread.join().ok()
    }
}

/// Spawns the worker thread.
///
/// With `drain` set the worker exits as soon as the scheduler goes idle;
/// otherwise it runs until `Shutdown` arrives or the `shutdown` flag is
/// raised from a signal handler.
pub fn spawn_worker(
    scheduler: Scheduler,
    drain: bool,
    shutdown: Option<&'static AtomicBool>,
) -> EngineHandle {
    let (tx, rx) = crossbeam_channel::unbounded();
    let thread = std::thread::spawn(move || run_worker(scheduler, rx, drain, shutdown));
    EngineHandle { tx, thread }
}

fn run_worker(
    mut scheduler: Scheduler,
    rx: crossbeam_channel::Receiver<EngineCommand>,
    drain: bool,
    shutdown: Option<&'static AtomicBool>,
) -> Scheduler {
    let tick = Duration::from_millis(scheduler.tick_ms());
    loop {
        if shutdown.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            debug!("worker stopping on shutdown signal");
            break;
        }

        match rx.recv_timeout(tick) {
            Ok(EngineCommand::Enqueue(job)) => {
                if let Err(e) = scheduler.enqueue(job) {
                    warn!(error = %e, "enqueue rejected");
                }
            }
            Ok(EngineCommand::Attach(observer)) => scheduler.attach(observer),
            Ok(EngineCommand::Detach) => scheduler.detach(),
            Ok(EngineCommand::Shutdown) => break,
            Err(RecvTimeoutError::Timeout) => scheduler.tick(),
            Err(RecvTimeoutError::Disconnected) => {
                if !drain {
                    break;
                }
                scheduler.tick();
                std::thread::sleep(tick);
            }
        }

        if drain && scheduler.is_idle() {
            debug!("queue drained; worker exiting");
            break;
        }
    }

    // A live channel observer would keep the consumer's receive loop from
    // ever ending once the scheduler is parked in the join handle.
    scheduler.detach();
    scheduler
}
