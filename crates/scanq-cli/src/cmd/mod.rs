pub(crate) mod run;
pub(crate) mod status;
pub(crate) mod submit;

use scanq_core::clock::SystemClock;
use scanq_core::config::{self, EngineConfig, ScanqConfig};
use scanq_core::credentials::StaticCredentials;
use scanq_core::engine::worker::spawn_worker;
use scanq_core::engine::Scheduler;
use scanq_core::observer::{ChannelObserver, Event};
use scanq_core::remote::HttpScanService;
use scanq_core::state::StateStore;
use scanq_core::store::LocalBlobStore;

use crate::progress::EventRenderer;
use crate::signal;

/// Assemble a scheduler from the config: state store and blob spool under
/// the state directory, HTTP transport against `remote.base_url`.
pub(crate) fn build_scheduler(cfg: &ScanqConfig) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let dir = config::state_dir(cfg);
    std::fs::create_dir_all(&dir)?;
    let store = StateStore::open(&dir)?;
    let blobs = LocalBlobStore::open(&dir.join("blobs"))?;
    let remote = HttpScanService::new(&cfg.remote.base_url);
    let credentials = StaticCredentials::from_config(&cfg.remote.api_key, cfg.remote.premium);
    let scheduler = Scheduler::new(
        EngineConfig::from_config(cfg),
        store,
        Box::new(blobs),
        Box::new(remote),
        Box::new(credentials),
        Box::new(SystemClock),
    )?;
    Ok(scheduler)
}

pub(crate) struct DriveSummary {
    pub completed: usize,
    pub failed: usize,
}

/// Run the scheduler on a worker thread until the queue drains, rendering
/// events along the way. Ctrl-C stops after the current step; the persisted
/// state lets a later `scanq run` pick up where this one left off.
pub(crate) fn drive_to_idle(
    mut scheduler: Scheduler,
) -> Result<DriveSummary, Box<dyn std::error::Error>> {
    let (tx, events) = crossbeam_channel::unbounded();
    scheduler.attach(Box::new(ChannelObserver::new(tx)));

    let mut renderer = EventRenderer::new();

    // The attach replay lands synchronously, before the worker starts.
    // Render the transient part; a replayed terminal outcome belongs to an
    // earlier invocation and is the `status` command's business.
    for event in events.try_iter() {
        if !matches!(event, Event::Completed { .. } | Event::Error { .. }) {
            renderer.on_event(&event);
        }
    }

    let handle = spawn_worker(scheduler, true, Some(&signal::SHUTDOWN));

    let mut completed = 0usize;
    let mut failed = 0usize;
    for event in events.iter() {
        match &event {
            Event::Completed { .. } => completed += 1,
            Event::Error { .. } => failed += 1,
            _ => {}
        }
        renderer.on_event(&event);
    }
    renderer.finish();

    let scheduler = handle.join().ok_or("queue worker panicked")?;
    if signal::requested() && !scheduler.is_idle() {
        eprintln!("Interrupted; run `scanq run` to resume.");
    }
    Ok(DriveSummary { completed, failed })
}
