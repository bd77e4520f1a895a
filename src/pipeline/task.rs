//! Background write task state machine
//!
//! `Queued -> Attempting -> {Succeeded, Abandoned}`. A task retries from
//! `Attempting` back into `Attempting`; both terminal states are final.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{TenantId, WriteRequest};
use crate::infra::retry::{is_connection_db_error, is_retryable_db_error};
use crate::infra::{RetryConfig, TenancyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Attempting,
    Succeeded,
    Abandoned,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Abandoned)
    }
}

/// What the worker does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    RetryAfter(Duration),
    Abandon,
}

/// Failures that no amount of retrying will fix.
///
/// Database errors are permanent unless they are a known transient code or a
/// broken connection; a statement the store rejects fails the same way again.
pub fn is_permanent(error: &TenancyError) -> bool {
    match error {
        TenancyError::TenantNotFound(_)
        | TenancyError::TenantInactive { .. }
        | TenancyError::InvalidWrite(_)
        | TenancyError::InvalidSchema(_) => true,
        TenancyError::Database(e) => !is_retryable_db_error(e) && !is_connection_db_error(e),
        _ => false,
    }
}

/// One accepted write, owned by the worker processing it.
#[derive(Debug)]
pub struct BackgroundWriteTask {
    id: Uuid,
    request: WriteRequest,
    accepted_at: DateTime<Utc>,
    state: TaskState,
    attempt: u32,
    backoff: RetryConfig,
    delays: Vec<Duration>,
    last_error: Option<String>,
}

impl BackgroundWriteTask {
    pub fn new(request: WriteRequest, backoff: RetryConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            accepted_at: Utc::now(),
            state: TaskState::Queued,
            attempt: 0,
            backoff,
            delays: Vec::new(),
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.request.tenant_id
    }

    pub fn request(&self) -> &WriteRequest {
        &self.request
    }

    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Attempts started so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts.max(1)
    }

    /// Delays scheduled between attempts, in order
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Start the next attempt and return its 1-indexed number.
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert!(!self.state.is_terminal());
        self.state = TaskState::Attempting;
        self.attempt += 1;
        self.attempt
    }

    pub fn succeed(&mut self) {
        self.state = TaskState::Succeeded;
    }

    /// Record a failed attempt and decide whether to try again.
    pub fn fail(&mut self, error: &TenancyError) -> NextStep {
        self.last_error = Some(error.to_string());

        if is_permanent(error) || self.attempt >= self.max_attempts() {
            self.state = TaskState::Abandoned;
            return NextStep::Abandon;
        }

        let delay = self.backoff.delay_after_attempt(self.attempt);
        self.delays.push(delay);
        NextStep::RetryAfter(delay)
    }

    /// Give up without another attempt, e.g. at shutdown.
    pub fn abandon(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
        self.state = TaskState::Abandoned;
    }

    /// The abandonment error for logs and events
    pub fn abandonment(&self) -> TenancyError {
        TenancyError::BackgroundWriteAbandoned {
            tenant_id: self.request.tenant_id.clone(),
            attempts: self.attempt,
            last_error: self.last_error.clone().unwrap_or_default(),
        }
    }
}
