use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use crate::control_plane::ControlPlane;

#[derive(Clone)]
pub struct ServeState {
    pub plane: Arc<ControlPlane>,
    pub health: Arc<ServeHealth>,
}

impl ServeState {
    pub fn new(plane: Arc<ControlPlane>) -> Self {
        Self::with_health(plane, Arc::new(ServeHealth::new()))
    }

    pub fn with_health(plane: Arc<ControlPlane>, health: Arc<ServeHealth>) -> Self {
        Self { plane, health }
    }
}

/// Liveness and readiness flags reported by the health endpoints.
#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.touch();
        *self.last_error.lock() = None;
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.touch();
        *self.last_error.lock() = Some(error.into());
    }

    pub fn snapshot(&self) -> ServeHealthSnapshot {
        ServeHealthSnapshot {
            live: self.live.load(Ordering::SeqCst),
            ready: self.ready.load(Ordering::SeqCst),
            last_ready_check: match self.last_ready_check.load(Ordering::SeqCst) {
                0 => None,
                ts => Some(ts),
            },
            last_error: self.last_error.lock().clone(),
        }
    }

    fn touch(&self) {
        let now = Utc::now().timestamp().max(0) as u64;
        self.last_ready_check.store(now, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
pub struct ServeHealthSnapshot {
    pub live: bool,
    pub ready: bool,
    pub last_ready_check: Option<u64>,
    pub last_error: Option<String>,
}
