use crate::job::{JobId, Phase};
use crate::remote::ReportRef;

/// Progress notification emitted by the scheduler.
///
/// Events describe the active job only. A newly attached observer first
/// receives a replay that reconstructs the current position (phase event,
/// latest progress, pending wait) so it never starts blind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CheckingStarted {
        job_id: JobId,
    },
    UploadStarted {
        job_id: JobId,
    },
    Progress {
        job_id: JobId,
        percent: u8,
        phase: Phase,
    },
    Waiting {
        job_id: JobId,
        resume_at: u64,
    },
    Retry {
        job_id: JobId,
        attempt: u32,
        max_retries: u32,
        resume_at: u64,
    },
    Completed {
        job_id: JobId,
        report: ReportRef,
    },
    Error {
        job_id: JobId,
        message: String,
    },
}

impl Event {
    pub fn job_id(&self) -> &JobId {
        match self {
            Event::CheckingStarted { job_id }
            | Event::UploadStarted { job_id }
            | Event::Progress { job_id, .. }
            | Event::Waiting { job_id, .. }
            | Event::Retry { job_id, .. }
            | Event::Completed { job_id, .. }
            | Event::Error { job_id, .. } => job_id,
        }
    }
}

pub trait Observer: Send {
    fn push(&self, event: Event);
}

/// Discards every event. Installed whenever no consumer is attached.
pub struct NullObserver;

impl Observer for NullObserver {
    fn push(&self, _event: Event) {}
}

/// Forwards events over a crossbeam channel. A closed receiver is treated
/// like a detached observer, not an error.
pub struct ChannelObserver {
    tx: crossbeam_channel::Sender<Event>,
}

impl ChannelObserver {
    pub fn new(tx: crossbeam_channel::Sender<Event>) -> Self {
        ChannelObserver { tx }
    }
}

impl Observer for ChannelObserver {
    fn push(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_events() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let obs = ChannelObserver::new(tx);
        obs.push(Event::CheckingStarted { job_id: "j1".into() });
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::CheckingStarted { job_id: "j1".into() }
        );
    }

    #[test]
    fn channel_observer_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let obs = ChannelObserver::new(tx);
        drop(rx);
        obs.push(Event::Error {
            job_id: "j1".into(),
            message: "gone".into(),
        });
    }

    #[test]
    fn job_id_accessor_covers_all_variants() {
        let id: JobId = "j9".into();
        let events = [
            Event::CheckingStarted { job_id: id.clone() },
            Event::UploadStarted { job_id: id.clone() },
            Event::Progress { job_id: id.clone(), percent: 3, phase: Phase::Checking },
            Event::Waiting { job_id: id.clone(), resume_at: 5 },
            Event::Retry { job_id: id.clone(), attempt: 1, max_retries: 3, resume_at: 5 },
            Event::Completed { job_id: id.clone(), report: ReportRef("r".into()) },
            Event::Error { job_id: id.clone(), message: "x".into() },
        ];
        for ev in &events {
            assert_eq!(ev.job_id(), &id);
        }
    }
}
