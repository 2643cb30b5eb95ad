//! Inference gate: single point of access to the classifier runtime.
//!
//! The model session is loaded once and shared, but the runtime needs `&mut`
//! for every `run` call. `GatedRuntime` owns the session behind its one lock
//! and reports to the shared `InferenceGate` while the lock is held:
//! - `acquire()` blocks until the runtime is free
//! - `try_acquire()` skips if busy
//! - `InferenceGate::current_operation()` reports what kind of call, which
//!   model, since when (read by the health endpoint)

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// What kind of model call is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Classifying an uploaded leaf photo.
    LeafClassification,
    /// Startup inference on a blank tensor to verify the model.
    ModelWarmup,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LeafClassification => write!(f, "Leaf classification"),
            Self::ModelWarmup => write!(f, "Model warm-up"),
        }
    }
}

/// Snapshot of the currently running model call.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveOperation {
    pub kind: OperationKind,
    pub model: String,
    /// ISO 8601.
    pub started_at: String,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceGateError {
    #[error("Internal lock error")]
    LockPoisoned,
}

// ═══════════════════════════════════════════════════════════
// InferenceGate
// ═══════════════════════════════════════════════════════════

/// What the model runtime is doing right now.
///
/// Set only while a `GatedRuntime` lock is held and cleared before that lock
/// is released, so `is_busy` matches the runtime's actual state.
pub struct InferenceGate {
    current_op: Mutex<Option<ActiveOperation>>,
}

impl InferenceGate {
    pub fn new() -> Self {
        Self {
            current_op: Mutex::new(None),
        }
    }

    /// `None` when idle.
    pub fn current_operation(&self) -> Option<ActiveOperation> {
        self.current_op.lock().ok()?.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.current_op
            .lock()
            .map(|op| op.is_some())
            .unwrap_or(false)
    }

    fn set_current_op(&self, kind: OperationKind, model: &str) {
        if let Ok(mut current) = self.current_op.lock() {
            *current = Some(ActiveOperation {
                kind,
                model: model.to_string(),
                started_at: chrono::Utc::now().to_rfc3339(),
            });
        }
    }

    fn clear_current_op(&self) {
        if let Ok(mut current) = self.current_op.lock() {
            *current = None;
        }
    }
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// GatedRuntime
// ═══════════════════════════════════════════════════════════

/// A model runtime that allows one call at a time.
pub struct GatedRuntime<T> {
    runtime: Mutex<T>,
    model: String,
    gate: Arc<InferenceGate>,
}

impl<T> GatedRuntime<T> {
    pub fn new(runtime: T, model: impl Into<String>, gate: Arc<InferenceGate>) -> Self {
        Self {
            runtime: Mutex::new(runtime),
            model: model.into(),
            gate,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Acquire exclusive access. Blocks until available.
    ///
    /// Hold the guard for the entire model call; dropping it clears the
    /// current operation and releases the runtime.
    pub fn acquire(&self, kind: OperationKind) -> Result<InferenceGuard<'_, T>, InferenceGateError> {
        let runtime = self
            .runtime
            .lock()
            .map_err(|_| InferenceGateError::LockPoisoned)?;
        Ok(self.enter(runtime, kind))
    }

    /// Acquire without blocking. `None` if a call is already running.
    pub fn try_acquire(&self, kind: OperationKind) -> Option<InferenceGuard<'_, T>> {
        let runtime = self.runtime.try_lock().ok()?;
        Some(self.enter(runtime, kind))
    }

    fn enter<'a>(&'a self, runtime: MutexGuard<'a, T>, kind: OperationKind) -> InferenceGuard<'a, T> {
        self.gate.set_current_op(kind, &self.model);
        InferenceGuard {
            runtime,
            gate: &self.gate,
        }
    }
}

/// RAII guard for exclusive runtime access.
pub struct InferenceGuard<'a, T> {
    runtime: MutexGuard<'a, T>,
    gate: &'a InferenceGate,
}

impl<T> Deref for InferenceGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.runtime
    }
}

impl<T> DerefMut for InferenceGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.runtime
    }
}

impl<T> Drop for InferenceGuard<'_, T> {
    // Runs before the runtime lock is released.
    fn drop(&mut self) {
        self.gate.clear_current_op();
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
