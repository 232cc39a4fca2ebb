//! Async bridge
//!
//! Host operations that finish later are queued on the owning instance's
//! [`AsyncBridge`]. A single worker task starts them in the order they
//! were issued and drives them concurrently, so a slow job never holds
//! back the ones behind it. Each result goes back through its own oneshot
//! channel and waiters resume independently of one another.
//!
//! There is no cancellation. Dropping a [`Deferred`] (for example when a
//! `tokio::time::timeout` around it fires) only discards interest in the
//! result; the host job still runs and its side effects still happen.
//! There is also no blocking wait: a host result is only reachable by
//! awaiting it on the runtime that drives the worker.

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{BridgeError, BridgeResult, ForeignCallError, HostError, HostResult, Operation};
use crate::host::{HostFuture, HostValue};
use crate::instance::ModuleInstance;
use crate::marshal::{GuestValue, Marshaller};

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Results nobody was waiting for any more
    pub discarded: u64,
}

struct HostJob {
    seq: u64,
    label: String,
    work: HostFuture,
    reply: oneshot::Sender<HostResult<HostValue>>,
}

/// Per-instance executor for deferred host work
pub struct AsyncBridge {
    jobs: mpsc::UnboundedSender<HostJob>,
    next_seq: AtomicU64,
    stats: Arc<Mutex<BridgeStats>>,
}

impl AsyncBridge {
    /// Spawn the worker on the current tokio runtime
    pub(crate) fn start(name: &str) -> Result<Self, String> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| format!("the bridge needs a tokio runtime: {}", e))?;
        let (jobs, queue) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(BridgeStats::default()));
        runtime.spawn(run_jobs(name.to_string(), queue, stats.clone()));

        Ok(Self {
            jobs,
            next_seq: AtomicU64::new(0),
            stats,
        })
    }

    /// Queue `work`; returns its sequence number and the result channel
    pub(crate) fn submit(
        &self,
        label: String,
        work: HostFuture,
    ) -> (u64, oneshot::Receiver<HostResult<HostValue>>) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (reply, receiver) = oneshot::channel();
        self.stats.lock().submitted += 1;

        let job = HostJob {
            seq,
            label,
            work,
            reply,
        };
        if self.jobs.send(job).is_err() {
            // the reply sender went down with the job, so the waiter sees a closed channel
            warn!(seq, "Bridge worker is gone, host job dropped");
        }
        (seq, receiver)
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats.lock().clone()
    }
}

async fn run_jobs(
    name: String,
    mut queue: mpsc::UnboundedReceiver<HostJob>,
    stats: Arc<Mutex<BridgeStats>>,
) {
    let mut running = FuturesUnordered::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            biased;

            job = queue.recv(), if accepting => match job {
                Some(job) => {
                    debug!(instance = %name, seq = job.seq, op = %job.label, "Host job started");
                    running.push(run_job(&name, job, &stats));
                }
                None => accepting = false,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
            else => break,
        }
    }
    debug!(instance = %name, "Bridge worker stopped");
}

async fn run_job(name: &str, job: HostJob, stats: &Mutex<BridgeStats>) {
    let result = match AssertUnwindSafe(job.work).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(HostError::exception(format!("{} panicked", job.label))),
    };

    {
        let mut stats = stats.lock();
        if result.is_ok() {
            stats.completed += 1;
        } else {
            stats.failed += 1;
        }
    }
    debug!(instance = %name, seq = job.seq, op = %job.label, ok = result.is_ok(), "Host job finished");

    if job.reply.send(result).is_err() {
        stats.lock().discarded += 1;
        warn!(instance = %name, seq = job.seq, "Deferred dropped before completion, result discarded");
    }
}

/// Result of a host operation that has not completed yet
///
/// Awaiting it yields the wrapped result, or the host's failure as a
/// bridge error.
pub struct Deferred {
    seq: u64,
    operation: Operation,
    target: String,
    receiver: oneshot::Receiver<HostResult<HostValue>>,
    instance: Arc<ModuleInstance>,
}

impl Deferred {
    pub(crate) fn submit(
        instance: &Arc<ModuleInstance>,
        operation: Operation,
        target: &str,
        work: HostFuture,
    ) -> Self {
        let label = format!("{} on {}", operation, target);
        let (seq, receiver) = instance.bridge().submit(label, work);
        Self {
            seq,
            operation,
            target: target.to_string(),
            receiver,
            instance: instance.clone(),
        }
    }

    /// Issue order within the owning instance
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

impl Future for Deferred {
    type Output = BridgeResult<GuestValue>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => {
                Poll::Ready(Ok(Marshaller::new(&this.instance).from_host(value)))
            }
            Poll::Ready(Ok(Err(err))) => Poll::Ready(Err(BridgeError::from_host(
                this.operation.clone(),
                &this.target,
                err,
            ))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ForeignCallError::new(
                this.operation.clone(),
                this.target.clone(),
                "host runtime stopped before the operation completed",
            )
            .into())),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("seq", &self.seq)
            .field("operation", &self.operation)
            .field("target", &self.target)
            .finish()
    }
}

/// Outcome of calling into the host
#[derive(Debug)]
pub enum Completion {
    Ready(GuestValue),
    Pending(Deferred),
}

impl Completion {
    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending(_))
    }

    /// The value if the call completed synchronously
    pub fn ready(self) -> Option<GuestValue> {
        match self {
            Completion::Ready(value) => Some(value),
            Completion::Pending(_) => None,
        }
    }
}

impl IntoFuture for Completion {
    type Output = BridgeResult<GuestValue>;
    type IntoFuture = BoxFuture<'static, BridgeResult<GuestValue>>;

    fn into_future(self) -> Self::IntoFuture {
        match self {
            Completion::Ready(value) => futures::future::ready(Ok(value)).boxed(),
            Completion::Pending(deferred) => deferred.boxed(),
        }
    }
}
