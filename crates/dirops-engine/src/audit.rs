//! Audit events and their delivery to a sink.
//!
//! Every event is serialized as a single JSON object using the activity-log keys
//! (`timestamp`, `user`, `action`, `object`, `status`, `message`) plus an `id`.
//! Delivery is serialized by the emitter's mutex, so events reach the sink in completion
//! order. Events the sink refused stay queued until [`AuditEmitter::redeliver`] succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

use dirops_core::ids::AuditEventId;
use dirops_core::Error;

use crate::Result;

/// Kind of operation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// Session establishment.
    Connect,
    /// User search.
    Search,
    /// Group membership addition.
    AddToGroup,
}

impl AuditAction {
    /// Wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Search => "search",
            Self::AddToGroup => "addtogroup",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Completed as requested (including the idempotent already-member case).
    Success,
    /// Refused or failed.
    Failure,
    /// Not attempted because confirmation was missing.
    Cancelled,
}

impl OperationStatus {
    /// Wire label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier.
    pub id: AuditEventId,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Identity of the operator running the engine.
    #[serde(rename = "user")]
    pub actor: String,
    /// Operation kind.
    pub action: AuditAction,
    /// DN, controller or query the operation was about.
    #[serde(rename = "object")]
    pub target: String,
    /// Outcome.
    pub status: OperationStatus,
    /// Human-readable detail.
    pub message: String,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        target: impl Into<String>,
        status: OperationStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: AuditEventId::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            target: target.into(),
            status,
            message: message.into(),
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Persists one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be persisted.
    fn accept(&self, event: &AuditEvent) -> Result<()>;
}

/// Stamps events with the actor and forwards them to the sink.
pub struct AuditEmitter {
    actor: String,
    sink: Arc<dyn AuditSink>,
    undelivered: Mutex<VecDeque<AuditEvent>>,
}

impl AuditEmitter {
    /// Creates an emitter for `actor`.
    #[must_use]
    pub fn new(actor: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            actor: actor.into(),
            sink,
            undelivered: Mutex::new(VecDeque::new()),
        }
    }

    /// Identity stamped on every event.
    #[must_use]
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Builds an event for this emitter's actor.
    #[must_use]
    pub fn event(
        &self,
        action: AuditAction,
        target: impl Into<String>,
        status: OperationStatus,
        message: impl Into<String>,
    ) -> AuditEvent {
        AuditEvent::new(self.actor.as_str(), action, target, status, message)
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<AuditEvent>> {
        self.undelivered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `event` to the sink.
    ///
    /// Events still waiting in the undelivered queue go out first, so the sink always sees
    /// completion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkUnavailable`] if the sink refused this event or an older queued
    /// one; every event not yet accepted stays queued.
    pub fn emit(&self, event: AuditEvent) -> Result<()> {
        let mut queue = self.queue();
        info!(
            target: "dirops::audit",
            id = %event.id,
            user = %event.actor,
            action = %event.action,
            object = %event.target,
            status = %event.status,
            "{}",
            event.message
        );

        let (id, action) = (event.id, event.action);
        queue.push_back(event);
        self.drain(&mut queue).map(|_| ()).map_err(|err| {
            error!(%id, %action, pending = queue.len(), "Audit sink rejected event: {err}");
            err
        })
    }

    /// Events the sink has not accepted yet, oldest first.
    #[must_use]
    pub fn undelivered(&self) -> Vec<AuditEvent> {
        self.queue().iter().cloned().collect()
    }

    /// Retries queued events in order, stopping at the first refusal.
    ///
    /// Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SinkUnavailable`] if the sink refuses an event; it and every later
    /// event stay queued.
    pub fn redeliver(&self) -> Result<usize> {
        let mut queue = self.queue();
        let delivered = self.drain(&mut queue)?;
        if delivered > 0 {
            info!(delivered, "Redelivered queued audit events");
        }
        Ok(delivered)
    }

    fn drain(&self, queue: &mut VecDeque<AuditEvent>) -> Result<usize> {
        let mut delivered = 0;
        while let Some(event) = queue.front() {
            self.sink.accept(event).map_err(sink_unavailable)?;
            queue.pop_front();
            delivered += 1;
        }
        Ok(delivered)
    }
}

fn sink_unavailable(err: Error) -> Error {
    match err {
        Error::SinkUnavailable(_) => err,
        other => Error::SinkUnavailable(other.to_string()),
    }
}

/// Combines an operation outcome with the delivery of its audit event.
///
/// An undelivered event always wins: the caller gets [`Error::SinkUnavailable`], carrying the
/// operation's own error in its message when the operation failed too.
pub(crate) fn settle<T>(outcome: Result<T>, delivered: Result<()>) -> Result<T> {
    match (outcome, delivered) {
        (outcome, Ok(())) => outcome,
        (Ok(_), Err(sink)) => Err(sink),
        (Err(err), Err(Error::SinkUnavailable(message))) => Err(Error::SinkUnavailable(format!(
            "{message}; unaudited failure: {err}"
        ))),
        (Err(_), Err(sink)) => Err(sink),
    }
}

/// In-process sink that keeps every event in memory.
#[derive(Debug)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
    available: AtomicBool,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditSink {
    /// Creates an empty, available sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggles availability; an unavailable sink refuses every event.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Events accepted so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of accepted events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no event was accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn accept(&self, event: &AuditEvent) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::SinkUnavailable(
                "memory sink is unavailable".to_string(),
            ));
        }
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}
