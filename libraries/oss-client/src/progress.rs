//! Upload progress reporting.
//!
//! Progress is published through a `watch` channel: a UI can poll the latest
//! value or await changes, and the stream ends when the upload attempt drops
//! its reporter.

use tokio::sync::watch;

/// Stage of an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Planning,
    Transferring,
    Finalizing,
    Completed,
    Failed,
    Aborted,
}

impl UploadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadPhase::Completed | UploadPhase::Failed | UploadPhase::Aborted
        )
    }
}

/// Snapshot of an upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub phase: UploadPhase,
    /// 0.0 to 100.0, never decreasing within one attempt
    pub percent: f64,
    pub completed_parts: u32,
    pub total_parts: u32,
    pub bytes_sent: u64,
    pub bytes_total: u64,
}

impl UploadProgress {
    fn initial() -> Self {
        Self {
            phase: UploadPhase::Planning,
            percent: 0.0,
            completed_parts: 0,
            total_parts: 0,
            bytes_sent: 0,
            bytes_total: 0,
        }
    }
}

/// Percentage of `done` out of `total`, clamped to 0..=100.
pub fn percent_of(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Publishing side of an upload's progress.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: watch::Sender<UploadProgress>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, watch::Receiver<UploadProgress>) {
        let (tx, rx) = watch::channel(UploadProgress::initial());
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadProgress> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> UploadProgress {
        self.tx.borrow().clone()
    }

    /// Enter the transfer phase for a plan of `total_parts` parts.
    pub fn start(&self, total_parts: u32, bytes_total: u64) {
        self.tx.send_modify(|p| {
            p.phase = UploadPhase::Transferring;
            p.total_parts = total_parts;
            p.bytes_total = bytes_total;
        });
    }

    /// Byte-level progress of a single-mode transfer.
    pub fn bytes_sent(&self, sent: u64) {
        self.tx.send_if_modified(|p| {
            if sent <= p.bytes_sent {
                return false;
            }
            p.bytes_sent = sent;
            p.percent = p.percent.max(percent_of(p.bytes_sent, p.bytes_total));
            true
        });
    }

    /// Another part settled successfully.
    pub fn part_completed(&self, completed_parts: u32, part_bytes: u64) {
        self.tx.send_if_modified(|p| {
            if completed_parts <= p.completed_parts {
                return false;
            }
            p.completed_parts = completed_parts;
            p.bytes_sent += part_bytes;
            let percent = percent_of(u64::from(completed_parts), u64::from(p.total_parts));
            p.percent = p.percent.max(percent);
            true
        });
    }

    pub fn set_phase(&self, phase: UploadPhase) {
        self.tx.send_if_modified(|p| {
            if p.phase == phase {
                return false;
            }
            p.phase = phase;
            true
        });
    }

    /// Transfer and finalize both succeeded.
    pub fn complete(&self) {
        self.tx.send_modify(|p| {
            p.phase = UploadPhase::Completed;
            p.percent = 100.0;
            p.completed_parts = p.total_parts;
            p.bytes_sent = p.bytes_total;
        });
    }
}
