use scanq_core::clock::{Clock, SystemClock};
use scanq_core::config::{self, ScanqConfig};
use scanq_core::limiter::WINDOW_MS;
use scanq_core::state::{LastOutcome, StateStore};

use crate::format::{format_bytes, format_duration_ms, format_time_ms};
use crate::table::{add_kv_row, CliTableTheme};

pub(crate) fn run_status(cfg: &ScanqConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dir = config::state_dir(cfg);
    let state = StateStore::peek(&dir)?;
    let now = SystemClock.now_ms();
    let theme = CliTableTheme::detect();

    let limit = if cfg.remote.premium {
        cfg.limits.premium_requests_per_minute
    } else {
        cfg.limits.requests_per_minute
    };
    let in_window = state
        .rate_window
        .iter()
        .filter(|&&t| now.saturating_sub(t) < WINDOW_MS)
        .count();

    let mut overview = theme.new_kv_table();
    match &state.current {
        Some(job) => {
            add_kv_row(&mut overview, theme, "Active", job.job_id.as_str());
            add_kv_row(&mut overview, theme, "Phase", job.phase);
            add_kv_row(
                &mut overview,
                theme,
                "Attempt",
                format!("{}/{}", job.attempt_number + 1, cfg.retry.max_retries + 1),
            );
            add_kv_row(
                &mut overview,
                theme,
                "Progress",
                format!("{}%", job.percent_complete),
            );
            add_kv_row(&mut overview, theme, "Size", format_bytes(job.size_bytes));
            if let Some(wake) = job.next_wake_at {
                add_kv_row(
                    &mut overview,
                    theme,
                    "Resumes",
                    format!(
                        "{} (in {})",
                        format_time_ms(wake),
                        format_duration_ms(wake.saturating_sub(now))
                    ),
                );
            }
        }
        None => add_kv_row(&mut overview, theme, "Active", "-"),
    }
    add_kv_row(&mut overview, theme, "Queued", state.queue.len());
    add_kv_row(
        &mut overview,
        theme,
        "Rate window",
        format!("{in_window} of {limit} requests used"),
    );
    if let Some(delay) = state.adaptive_delay_ms {
        add_kv_row(&mut overview, theme, "Backoff", format_duration_ms(delay));
    }
    println!("{overview}");

    if !state.queue.is_empty() {
        println!();
        let mut pending = theme.new_data_table(&["ID", "SIZE", "QUEUED AT"]);
        for job in &state.queue {
            pending.add_row(vec![
                job.id.as_str().to_string(),
                format_bytes(job.size_bytes),
                format_time_ms(job.enqueued_at),
            ]);
        }
        println!("{pending}");
    }

    if let Some(outcome) = &state.last_outcome {
        println!();
        let mut last = theme.new_kv_table();
        match outcome {
            LastOutcome::Completed { job_id, report, at } => {
                add_kv_row(&mut last, theme, "Last result", format!("{job_id} completed"));
                add_kv_row(&mut last, theme, "Report", report);
                add_kv_row(&mut last, theme, "At", format_time_ms(*at));
            }
            LastOutcome::Failed {
                job_id,
                message,
                at,
            } => {
                add_kv_row(&mut last, theme, "Last result", format!("{job_id} failed"));
                add_kv_row(&mut last, theme, "Reason", message);
                add_kv_row(&mut last, theme, "At", format_time_ms(*at));
            }
        }
        println!("{last}");
    }

    Ok(())
}
