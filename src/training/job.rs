use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

/// How an accepted training job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The artifact was committed to the canonical weight path.
    Ready { artifact: PathBuf },
    Failed(String),
    /// A reset happened while the job ran; its results were discarded.
    Stale,
}

/// Completion handle for one background training job.
///
/// Dropping the handle detaches the worker; status polling keeps working.
#[derive(Debug)]
pub struct TrainingJob {
    id: String,
    done: Receiver<JobOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl TrainingJob {
    pub(crate) fn new(id: String, handle: JoinHandle<()>, done: Receiver<JobOutcome>) -> Self {
        Self {
            id,
            done,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the worker reports.
    pub fn wait(mut self) -> JobOutcome {
        let outcome = self.done.recv().unwrap_or_else(|_| worker_vanished());
        self.join();
        outcome
    }

    /// Wait up to `timeout`; on timeout the handle is returned for another try.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<JobOutcome, TrainingJob> {
        match self.done.recv_timeout(timeout) {
            Ok(outcome) => {
                self.join();
                Ok(outcome)
            }
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Ok(worker_vanished())
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_vanished() -> JobOutcome {
    JobOutcome::Failed("Training worker exited without reporting".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn wait_returns_the_reported_outcome() {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let _ = tx.send(JobOutcome::Stale);
        });
        let job = TrainingJob::new("j".into(), handle, rx);
        assert_eq!(job.id(), "j");
        assert_eq!(job.wait(), JobOutcome::Stale);
    }

    #[test]
    fn timeout_hands_the_job_back() {
        let (tx, rx) = mpsc::channel::<JobOutcome>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = std::thread::spawn(move || {
            let _ = release_rx.recv();
            let _ = tx.send(JobOutcome::Failed("boom".into()));
        });
        let job = TrainingJob::new("j".into(), handle, rx);
        let job = job
            .wait_timeout(Duration::from_millis(10))
            .expect_err("job should still be running");
        release_tx.send(()).unwrap();
        assert_eq!(job.wait(), JobOutcome::Failed("boom".into()));
    }

    #[test]
    fn silent_worker_counts_as_failure() {
        let (tx, rx) = mpsc::channel::<JobOutcome>();
        let handle = std::thread::spawn(move || drop(tx));
        let job = TrainingJob::new("j".into(), handle, rx);
        assert!(matches!(job.wait(), JobOutcome::Failed(_)));
    }
}
