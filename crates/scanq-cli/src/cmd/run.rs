use scanq_core::config::ScanqConfig;

use crate::cmd::{build_scheduler, drive_to_idle};

pub(crate) fn run_queue(cfg: &ScanqConfig) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = build_scheduler(cfg)?;
    if scheduler.is_idle() {
        println!("Queue is empty.");
        return Ok(());
    }

    let summary = drive_to_idle(scheduler)?;
    println!(
        "Processed: {} completed, {} failed",
        summary.completed, summary.failed
    );
    if summary.failed > 0 {
        return Err(format!("{} submission(s) failed", summary.failed).into());
    }
    Ok(())
}
