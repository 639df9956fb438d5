use std::io::{self, IsTerminal, Stderr, Write};
use std::sync::atomic::{AtomicBool, Ordering::Relaxed};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing_subscriber::fmt::MakeWriter;

use scanq_core::clock::{Clock, SystemClock};
use scanq_core::observer::Event;

use crate::format::format_duration_ms;

const STATUS_REDRAW_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Shared state between the status renderer and the tracing writer
// ---------------------------------------------------------------------------

/// True while a `\r` status line is being displayed on stderr.
static PROGRESS_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Serializes all stderr writes between the status renderer and tracing.
static STDERR_LOCK: Mutex<()> = Mutex::new(());

fn acquire_stderr_lock() -> MutexGuard<'static, ()> {
    STDERR_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Progress-aware tracing writer
// ---------------------------------------------------------------------------

/// A [`MakeWriter`] that clears the status line before each tracing event,
/// preventing log messages from corrupting the `\r`-based display.
pub(crate) struct ProgressAwareStderr;

/// Holds the `STDERR_LOCK` guard for the entire lifetime of a single tracing
/// write, so the lock spans from the line-clear through the full log message.
pub(crate) struct ProgressWriter {
    _guard: MutexGuard<'static, ()>,
    inner: Stderr,
}

impl Write for ProgressWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a> MakeWriter<'a> for ProgressAwareStderr {
    type Writer = ProgressWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let guard = acquire_stderr_lock();
        let mut stderr = io::stderr();

        if PROGRESS_ACTIVE.load(Relaxed) && stderr.is_terminal() {
            // Clear the current status line so the log message starts clean.
            let _ = stderr.write_all(b"\r\x1b[2K");
        }

        ProgressWriter {
            _guard: guard,
            inner: stderr,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler event renderer
// ---------------------------------------------------------------------------

enum Rendered {
    /// Transient state. Drawn on the single `\r` status line; `transition`
    /// forces a redraw past the throttle.
    Status { line: String, transition: bool },
    /// Terminal outcome. Printed as a persistent line on stdout.
    Outcome(String),
}

fn describe(event: &Event, now_ms: u64) -> Rendered {
    match event {
        Event::CheckingStarted { job_id } => Rendered::Status {
            line: format!("{job_id}: checking for an existing report"),
            transition: true,
        },
        Event::UploadStarted { job_id } => Rendered::Status {
            line: format!("{job_id}: uploading"),
            transition: true,
        },
        Event::Progress {
            job_id,
            percent,
            phase,
        } => Rendered::Status {
            line: format!("{job_id}: {phase} {percent:>3}%"),
            transition: false,
        },
        Event::Waiting { job_id, resume_at } => Rendered::Status {
            line: format!(
                "{job_id}: rate window full, resuming in {}",
                format_duration_ms(resume_at.saturating_sub(now_ms))
            ),
            transition: true,
        },
        Event::Retry {
            job_id,
            attempt,
            max_retries,
            resume_at,
        } => Rendered::Status {
            line: format!(
                "{job_id}: retry {attempt}/{max_retries} in {}",
                format_duration_ms(resume_at.saturating_sub(now_ms))
            ),
            transition: true,
        },
        Event::Completed { job_id, report } => {
            Rendered::Outcome(format!("Completed: {job_id} ({})", report.0))
        }
        Event::Error { job_id, message } => {
            Rendered::Outcome(format!("Failed: {job_id}: {message}"))
        }
    }
}

/// Renders scheduler events as one live status line on stderr plus a
/// persistent stdout line per terminal outcome. On a non-terminal stderr
/// only state transitions are printed, one per line.
pub(crate) struct EventRenderer {
    interactive: bool,
    last_draw: Instant,
    last_line_len: usize,
    rendered_any: bool,
}

impl EventRenderer {
    pub(crate) fn new() -> Self {
        let interactive = io::stderr().is_terminal();
        if interactive {
            PROGRESS_ACTIVE.store(true, Relaxed);
        }
        Self {
            interactive,
            last_draw: Instant::now(),
            last_line_len: 0,
            rendered_any: false,
        }
    }

    pub(crate) fn on_event(&mut self, event: &Event) {
        match describe(event, SystemClock.now_ms()) {
            Rendered::Status { line, transition } => self.draw(&line, transition),
            Rendered::Outcome(line) => self.print_outcome(&line),
        }
    }

    pub(crate) fn finish(&mut self) {
        if !self.interactive {
            return;
        }
        if self.rendered_any {
            let _guard = acquire_stderr_lock();
            eprintln!();
            self.rendered_any = false;
            self.last_line_len = 0;
        }
        PROGRESS_ACTIVE.store(false, Relaxed);
    }

    fn draw(&mut self, line: &str, force: bool) {
        if !self.interactive {
            if force {
                let _guard = acquire_stderr_lock();
                eprintln!("{line}");
            }
            return;
        }
        if !force && self.rendered_any && self.last_draw.elapsed() < STATUS_REDRAW_INTERVAL {
            return;
        }
        self.last_draw = Instant::now();

        let line_len = line.chars().count();
        let pad = self.last_line_len.saturating_sub(line_len);
        {
            let _guard = acquire_stderr_lock();
            eprint!("\r{line}{}", " ".repeat(pad));
            let _ = io::stderr().flush();
        }
        self.last_line_len = line_len;
        self.rendered_any = true;
    }

    fn print_outcome(&mut self, line: &str) {
        let _guard = acquire_stderr_lock();
        if self.interactive && self.rendered_any {
            let mut stderr = io::stderr();
            let _ = stderr.write_all(b"\r\x1b[2K");
            let _ = stderr.flush();
            self.rendered_any = false;
            self.last_line_len = 0;
        }
        println!("{line}");
    }
}
