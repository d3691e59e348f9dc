//! Global data service: the single entry point that owns at most one
//! active [`DataSession`] at a time.
//!
//! Grounded on the teacher's `pipeline::mod::EventPipeline` "single
//! registered processor, replace on restart" lifecycle, narrowed to this
//! domain's "at most one session" invariant from spec.md §4.1.

use std::sync::{Arc, Mutex};

use crate::config::IngestConfig;
use crate::context::SimulationContext;
use crate::error::IngestError;
use crate::model::SessionId;
use crate::repository::FrameRepository;
use crate::session::DataSession;

/// Owns the process-wide [`FrameRepository`], [`SimulationContext`], and
/// the currently running session, if any.
pub struct DataService {
    pub repository: Arc<FrameRepository>,
    pub context: Arc<SimulationContext>,
    active: Mutex<Option<DataSession>>,
}

impl DataService {
    pub fn new(window_size: f64) -> Self {
        let repository = Arc::new(FrameRepository::new(window_size));
        let context = Arc::new(SimulationContext::new(repository.clone()));
        Self {
            repository,
            context,
            active: Mutex::new(None),
        }
    }

    /// Start a new session against `config`. Requires a session id to
    /// already have been issued via [`SimulationContext::start`]; fails
    /// fast with [`IngestError`] on a missing `db_path` or absent session.
    ///
    /// Any previously running session is stopped (fire-and-forget, per
    /// spec.md §4.5's "does not wait" contract) before the new one is
    /// spawned.
    pub fn start(&self, config: IngestConfig) -> Result<SessionId, IngestError> {
        if config.db_path.as_os_str().is_empty() {
            return Err(IngestError::MissingDbPath);
        }
        let session_id = self.context.current().ok_or(IngestError::NoActiveSession)?;

        let mut active = self.active.lock().unwrap();
        if let Some(previous) = active.take() {
            previous.stop();
        }

        let session = DataSession::spawn(
            config.db_path,
            config.query_interval,
            config.expected_column_counts,
            self.repository.clone(),
            session_id,
        );
        *active = Some(session);

        Ok(session_id)
    }

    /// Offer a simulation-time hint to the running session. No-op if no
    /// session is running.
    pub fn enqueue_time(&self, t: f64) {
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            session.enqueue(t);
        }
    }

    /// Mark the running session complete (graceful drain). No-op,
    /// including not invoking `callback`, if no session is running —
    /// symmetric with `enqueue_time`'s silent no-op.
    pub fn complete_session(&self, callback: impl FnOnce() + Send + 'static) {
        if let Some(session) = self.active.lock().unwrap().as_ref() {
            session.mark_complete(callback);
        }
    }

    /// Force-stop the running session, if any, and clear it from the
    /// service. Also clears the simulation context's current session.
    pub fn stop(&self) {
        if let Some(session) = self.active.lock().unwrap().take() {
            session.stop();
        }
        self.context.stop();
    }
}
