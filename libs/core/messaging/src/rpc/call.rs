use crate::broker::Envelope;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Deadline offset used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle of one validation call.
///
/// ```text
/// Init -> QueueDeclared -> Published -> Waiting -> Valid | Invalid | TimedOut | Cancelled
///   \__________________ any step may fail ________________________________/-> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Init,
    QueueDeclared,
    Published,
    Waiting,
    Valid,
    Invalid,
    TimedOut,
    Cancelled,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallState::Valid
                | CallState::Invalid
                | CallState::TimedOut
                | CallState::Cancelled
                | CallState::Failed
        )
    }

    fn rank(self) -> u8 {
        match self {
            CallState::Init => 0,
            CallState::QueueDeclared => 1,
            CallState::Published => 2,
            CallState::Waiting => 3,
            _ => 4,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Init => "init",
            CallState::QueueDeclared => "queue_declared",
            CallState::Published => "published",
            CallState::Waiting => "waiting",
            CallState::Valid => "valid",
            CallState::Invalid => "invalid",
            CallState::TimedOut => "timed_out",
            CallState::Cancelled => "cancelled",
            CallState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Bookkeeping for one in-flight call: its correlation id, the reply queue
/// it owns, when it gives up, and where it is in its lifecycle.
#[derive(Debug)]
pub struct PendingCall {
    correlation_id: String,
    reply_queue: Option<String>,
    deadline: Instant,
    state: CallState,
    discarded: u32,
}

impl PendingCall {
    /// A timeout too large to represent waits effectively forever.
    pub fn new(correlation_id: impl Into<String>, timeout: Duration) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        Self {
            correlation_id: correlation_id.into(),
            reply_queue: None,
            deadline,
            state: CallState::Init,
            discarded: 0,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn reply_queue(&self) -> Option<&str> {
        self.reply_queue.as_deref()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Replies dropped because their correlation id did not match.
    pub fn discarded(&self) -> u32 {
        self.discarded
    }

    pub(crate) fn queue_declared(&mut self, reply_queue: String) -> bool {
        if !self.advance(CallState::QueueDeclared) {
            return false;
        }
        self.reply_queue = Some(reply_queue);
        true
    }

    /// Move forward to `next`.
    ///
    /// Returns `false` and leaves the state alone if the call has already
    /// resolved or `next` would go backwards.
    pub(crate) fn advance(&mut self, next: CallState) -> bool {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    /// Whether `reply` belongs to this call.
    pub fn matches(&self, reply: &Envelope) -> bool {
        reply.correlation_id.as_deref() == Some(self.correlation_id.as_str())
    }

    pub(crate) fn record_discarded(&mut self) {
        self.discarded += 1;
    }
}
