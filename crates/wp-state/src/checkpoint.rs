//! Checkpointing of the three stores to a run's output location.
//!
//! A [`CheckpointSnapshot`] is captured on the optimizer thread and handed
//! to a [`CheckpointSink`]. The synchronous sink writes it immediately; the
//! asynchronous one queues it for a single background writer. Either way,
//! snapshots are written in submission order: ledger, then budget, then
//! trajectory.

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;
use wp_types::{WpError, WpResult};

use crate::artifacts::{write_atomic, ArtifactPaths};
use crate::budget::BudgetTracker;
use crate::ledger::Ledger;
use crate::trajectory::{TrajectoryDelta, TrajectoryRecorder};

/// Serialized state of all three stores at one point in time.
#[derive(Debug, Clone)]
pub struct CheckpointSnapshot {
    pub paths: ArtifactPaths,
    pub ledger: Vec<u8>,
    pub budget: Vec<u8>,
    pub trajectory: TrajectoryDelta,
}

impl CheckpointSnapshot {
    pub fn capture(
        paths: &ArtifactPaths,
        session_id: Uuid,
        ledger: &Ledger,
        budget: &BudgetTracker,
        trajectory: &TrajectoryRecorder,
    ) -> WpResult<Self> {
        Ok(Self {
            paths: paths.clone(),
            ledger: serde_json::to_vec_pretty(&ledger.to_document(session_id))?,
            budget: serde_json::to_vec_pretty(&budget.to_document(session_id))?,
            trajectory: trajectory.pending()?,
        })
    }

    /// Entries of the trajectory persisted once this snapshot is written.
    pub fn trajectory_upto(&self) -> usize {
        self.trajectory.upto
    }

    fn write_documents(&self) -> std::io::Result<()> {
        write_atomic(&self.paths.ledger, &self.ledger)?;
        write_atomic(&self.paths.budget, &self.budget)
    }
}

/// Destination for checkpoints.
pub trait CheckpointSink: Send {
    /// Persist (or queue) `snapshot`. Once this returns `Ok`, the trajectory
    /// entries in the snapshot count as flushed.
    fn submit(&mut self, snapshot: CheckpointSnapshot) -> WpResult<()>;

    /// Block until everything submitted so far is on disk.
    fn flush(&mut self) -> WpResult<()>;
}

/// Writes in the caller's thread.
#[derive(Debug, Default)]
pub struct SyncCheckpointer;

impl SyncCheckpointer {
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointSink for SyncCheckpointer {
    fn submit(&mut self, snapshot: CheckpointSnapshot) -> WpResult<()> {
        snapshot.write_documents()?;
        snapshot.trajectory.write_to(&snapshot.paths.trajectory)?;
        debug!("Checkpoint written to {}", snapshot.paths.ledger.display());
        Ok(())
    }

    fn flush(&mut self) -> WpResult<()> {
        Ok(())
    }
}

enum Job {
    Write(Box<CheckpointSnapshot>),
    Flush(Sender<()>),
}

#[derive(Debug, Default)]
struct WriterState {
    last_error: Option<String>,
    /// Set after a failed trajectory append; later appends are dropped so the
    /// file never skips entries. A full rewrite clears it.
    trajectory_broken: bool,
}

/// Fire-and-forget checkpointing on a dedicated writer thread.
pub struct AsyncCheckpointer {
    sender: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
    state: Arc<Mutex<WriterState>>,
}

impl AsyncCheckpointer {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let state = Arc::new(Mutex::new(WriterState::default()));
        let writer_state = Arc::clone(&state);

        let handle = std::thread::spawn(move || {
            for job in receiver {
                match job {
                    Job::Write(snapshot) => Self::write(&snapshot, &writer_state),
                    Job::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
            state,
        }
    }

    fn write(snapshot: &CheckpointSnapshot, state: &Mutex<WriterState>) {
        if let Err(e) = snapshot.write_documents() {
            error!("Checkpoint write to {} failed: {}", snapshot.paths.ledger.display(), e);
            state.lock().last_error = Some(e.to_string());
        }

        let delta = &snapshot.trajectory;
        if delta.is_empty() {
            return;
        }
        if state.lock().trajectory_broken && !delta.rewrite {
            debug!("Skipping trajectory append after an earlier failure");
            return;
        }
        match delta.write_to(&snapshot.paths.trajectory) {
            Ok(()) => state.lock().trajectory_broken = false,
            Err(e) => {
                error!(
                    "Trajectory write to {} failed: {}",
                    snapshot.paths.trajectory.display(),
                    e
                );
                let mut guard = state.lock();
                guard.last_error = Some(e.to_string());
                guard.trajectory_broken = true;
            }
        }
    }

    fn take_error(&self) -> WpResult<()> {
        match self.state.lock().last_error.take() {
            Some(message) => Err(WpError::Checkpoint(message)),
            None => Ok(()),
        }
    }

    /// Drain the queue, stop the writer and report any write failure.
    pub fn shutdown(mut self) -> WpResult<()> {
        self.stop();
        self.take_error()
    }

    fn stop(&mut self) {
        // Dropping the sender ends the writer loop once the queue is drained.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Checkpoint writer thread panicked");
            }
        }
    }
}

impl Default for AsyncCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointSink for AsyncCheckpointer {
    fn submit(&mut self, snapshot: CheckpointSnapshot) -> WpResult<()> {
        self.take_error()?;
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| WpError::Checkpoint("checkpoint writer is shut down".to_string()))?;
        sender
            .send(Job::Write(Box::new(snapshot)))
            .map_err(|_| WpError::Checkpoint("checkpoint writer stopped".to_string()))
    }

    fn flush(&mut self) -> WpResult<()> {
        if let Some(sender) = &self.sender {
            let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
            sender
                .send(Job::Flush(ack_tx))
                .map_err(|_| WpError::Checkpoint("checkpoint writer stopped".to_string()))?;
            ack_rx
                .recv()
                .map_err(|_| WpError::Checkpoint("checkpoint writer stopped".to_string()))?;
        }
        self.take_error()
    }
}

impl Drop for AsyncCheckpointer {
    fn drop(&mut self) {
        self.stop();
    }
}
