use std::path::Path;

use scanq_core::clock::{Clock, SystemClock};
use scanq_core::config::{self, ScanqConfig};
use scanq_core::job::Job;
use scanq_core::store::{BlobStore, LocalBlobStore};

use crate::cmd::{build_scheduler, drive_to_idle};
use crate::format::format_bytes;

pub(crate) fn run_submit(
    cfg: &ScanqConfig,
    path: &str,
    id: Option<&str>,
    queue_only: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path).map_err(|e| format!("cannot read '{path}': {e}"))?;
    if bytes.is_empty() {
        return Err(format!("'{path}' is empty; nothing to scan").into());
    }

    let id = match id {
        Some(id) => id.to_string(),
        None => Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| format!("cannot derive an id from '{path}'; pass --id"))?,
    };

    let mut scheduler = build_scheduler(cfg)?;
    scheduler.enqueue(Job {
        id: id.as_str().into(),
        size_bytes: bytes.len() as u64,
        enqueued_at: SystemClock.now_ms(),
    })?;

    // Spool the content only after the id clears the dedup check, so a
    // duplicate submit cannot overwrite the artifact of an in-flight job.
    let state_dir = config::state_dir(cfg);
    let blobs = LocalBlobStore::open(&state_dir.join("blobs"))?;
    blobs.put(&id, &bytes)?;

    println!("Queued: {id} ({})", format_bytes(bytes.len() as u64));
    if queue_only {
        return Ok(());
    }

    let summary = drive_to_idle(scheduler)?;
    if summary.failed > 0 {
        return Err(format!("{} submission(s) failed", summary.failed).into());
    }
    Ok(())
}
