use crate::*;
use client_listener::ConnectionId;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::{
    sync::mpsc::UnboundedSender,
    task::{self, JoinHandle},
    time::{self, Duration, Instant},
};

/// How long a lookup may take before falling back to the address
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Starts hostname lookups and reports their results on an event channel.
pub struct DnsClient {
    resolver: Arc<dyn ReverseResolver>,
    event_channel: UnboundedSender<DnsResult>,
    timeout: Duration,
}

impl DnsClient {
    /// Construct a `DnsClient`. The result of each lookup is sent over
    /// `event_channel` when it completes.
    pub fn new(resolver: impl ReverseResolver, event_channel: UnboundedSender<DnsResult>) -> Self {
        Self {
            resolver: Arc::new(resolver),
            event_channel,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Begin a lookup for `addr`.
    ///
    /// `conn` is not used internally, but is attached to the result to allow
    /// it to be associated with the request. Exactly one [`DnsResult`] is sent
    /// for each call, unless the returned handle is dropped first.
    pub fn start_lookup(&self, conn: ConnectionId, addr: IpAddr) -> PendingResolution {
        let deadline = Instant::now() + self.timeout;
        let slot = Arc::new(CompletionSlot::new(self.event_channel.clone()));

        let lookup = task::spawn({
            let slot = Arc::clone(&slot);
            let resolver = Arc::clone(&self.resolver);
            async move {
                let outcome = match resolver.reverse_lookup(addr).await {
                    Some(name) => ResolutionOutcome::Found(name),
                    None => ResolutionOutcome::Failed,
                };
                slot.complete(DnsResult {
                    conn,
                    addr,
                    outcome,
                });
            }
        });

        let timer = task::spawn({
            let slot = Arc::clone(&slot);
            async move {
                time::sleep_until(deadline).await;
                slot.complete(DnsResult {
                    conn,
                    addr,
                    outcome: ResolutionOutcome::TimedOut,
                });
            }
        });

        slot.tasks.lock().extend([lookup, timer]);

        tracing::debug!(%conn, %addr, "Started hostname lookup");

        PendingResolution {
            conn,
            addr,
            deadline,
            slot,
        }
    }
}

/// Single-assignment cell shared by the lookup and the timer.
struct CompletionSlot {
    outcome: OnceCell<ResolutionOutcome>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_channel: UnboundedSender<DnsResult>,
}

impl CompletionSlot {
    fn new(event_channel: UnboundedSender<DnsResult>) -> Self {
        Self {
            outcome: OnceCell::new(),
            tasks: Mutex::new(Vec::new()),
            event_channel,
        }
    }

    /// Record `result` if nothing has completed yet, notify it, and cancel
    /// whichever side is still running. Returns whether this call won.
    fn complete(&self, result: DnsResult) -> bool {
        if self.outcome.set(result.outcome.clone()).is_err() {
            return false;
        }

        tracing::debug!(conn = %result.conn, outcome = ?result.outcome, "Hostname lookup complete");

        if self.event_channel.send(result).is_err() {
            tracing::error!("Error sending DNS result");
        }
        self.cancel();
        true
    }

    fn cancel(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// An in-flight lookup. Dropping it cancels the lookup and its timer, after
/// which no result will be sent.
pub struct PendingResolution {
    conn: ConnectionId,
    addr: IpAddr,
    deadline: Instant,
    slot: Arc<CompletionSlot>,
}

impl PendingResolution {
    pub fn connection(&self) -> ConnectionId {
        self.conn
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// When the fallback will be used if the resolver hasn't answered
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The outcome, once either side has completed
    pub fn outcome(&self) -> Option<&ResolutionOutcome> {
        self.slot.outcome.get()
    }

    pub fn is_complete(&self) -> bool {
        self.outcome().is_some()
    }
}

impl Drop for PendingResolution {
    fn drop(&mut self) {
        self.slot.cancel();
    }
}
