//! Simulation context: issues session identifiers and start/stop signals.
//!
//! Generalized from the teacher's `proxy::sessions::SessionKey` lifecycle
//! bookkeeping, narrowed from per-user multi-session tracking down to the
//! single active simulation session this domain has.

use std::sync::{Arc, RwLock};

use crate::model::SessionId;
use crate::repository::FrameRepository;

type StartedSubscriber = Box<dyn Fn(SessionId) + Send + Sync>;
type StoppedSubscriber = Box<dyn Fn() + Send + Sync>;

/// Authority that issues session identifiers and emits
/// session-started/stopped signals to subscribers.
pub struct SimulationContext {
    repository: Arc<FrameRepository>,
    current: RwLock<Option<SessionId>>,
    on_started: RwLock<Vec<StartedSubscriber>>,
    on_stopped: RwLock<Vec<StoppedSubscriber>>,
}

impl SimulationContext {
    pub fn new(repository: Arc<FrameRepository>) -> Self {
        Self {
            repository,
            current: RwLock::new(None),
            on_started: RwLock::new(Vec::new()),
            on_stopped: RwLock::new(Vec::new()),
        }
    }

    pub fn on_session_started(&self, f: impl Fn(SessionId) + Send + Sync + 'static) {
        self.on_started.write().unwrap().push(Box::new(f));
    }

    pub fn on_session_stopped(&self, f: impl Fn() + Send + Sync + 'static) {
        self.on_stopped.write().unwrap().push(Box::new(f));
    }

    /// Generate a fresh session id, transition the repository onto it, and
    /// notify subscribers.
    pub fn start(&self) -> SessionId {
        let id = SessionId::new();
        self.repository.start_new_session(id);
        *self.current.write().unwrap() = Some(id);
        for subscriber in self.on_started.read().unwrap().iter() {
            subscriber(id);
        }
        id
    }

    /// Notify subscribers and clear the current identifier.
    pub fn stop(&self) {
        for subscriber in self.on_stopped.read().unwrap().iter() {
            subscriber();
        }
        *self.current.write().unwrap() = None;
    }

    pub fn current(&self) -> Option<SessionId> {
        *self.current.read().unwrap()
    }
}
