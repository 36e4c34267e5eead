use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// One update emitted during generation (spec §6). Mirrors the shape of a
/// caller-facing progress stream: a thread count, the active stage, and
/// occasional preview/accuracy snapshots.
#[derive(Clone, Debug)]
pub enum ProgressMsg {
    Progress {
        current_thread: u32,
        total_threads: u32,
        stage_label: &'static str,
    },
    Preview {
        current_thread: u32,
        preview_png_bytes: Vec<u8>,
        accuracy: f64,
    },
    Warning(String),
    Done(crate::result::GenerationResult),
    Cancelled,
}

/// Anything that can receive progress updates. A closure works directly, so
/// callers don't need to build a channel just to observe one job.
pub trait ProgressSink {
    fn send(&mut self, msg: ProgressMsg);
}

impl ProgressSink for std::sync::mpsc::SyncSender<ProgressMsg> {
    fn send(&mut self, msg: ProgressMsg) {
        let _ = std::sync::mpsc::SyncSender::send(self, msg);
    }
}

impl<T> ProgressSink for T
where
    T: FnMut(ProgressMsg),
{
    fn send(&mut self, msg: ProgressMsg) {
        self(msg);
    }
}

/// Compares against a live job id so a stale, already-superseded job's
/// background work stops contributing once a newer job has started (spec
/// §9 design note on re-entrant generation calls).
#[derive(Clone)]
pub struct JobToken {
    current_job_id: Arc<AtomicU32>,
    this_job_id: u32,
    cancel: Arc<AtomicBool>,
}

impl JobToken {
    pub fn new(current_job_id: Arc<AtomicU32>, cancel: Arc<AtomicBool>) -> Self {
        let this_job_id = current_job_id.fetch_add(1, Ordering::SeqCst) + 1;
        JobToken {
            current_job_id,
            this_job_id,
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed) || self.current_job_id.load(Ordering::SeqCst) != self.this_job_id
    }
}
