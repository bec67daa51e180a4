//! Mode-aware outbound instruction queue.
//!
//! Producers (local input, remote control messages, hook bridges) push
//! instructions tagged with the mode they were composed under. A single
//! consumer drains them as batches: consecutive items sharing a mode hash are
//! joined into one agent turn, while isolated items always travel alone.
//!
//! Only one `wait_for_batch` call may be outstanding at a time. A second
//! waiter replaces the first, which then resolves to `None`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{QueueError, QueueResult};

/// Derives the equivalence-class fingerprint of a mode.
pub type ModeHashFn<M> = Arc<dyn Fn(&M) -> String + Send + Sync>;

/// Observability hook invoked for every accepted push.
pub type MessageHook<M> = Arc<dyn Fn(&str, &M) + Send + Sync>;

/// An instruction waiting to be delivered.
#[derive(Debug, Clone)]
struct QueueItem<M> {
    message: String,
    mode: M,
    mode_hash: String,
    isolate: bool,
}

/// A group of instructions delivered as one agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<M> {
    /// Item messages joined with `\n`.
    pub message: String,
    /// Mode of the first item; all items share its hash.
    pub mode: M,
    pub hash: String,
    pub isolate: bool,
}

/// Why a pending waiter was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Item,
    Closed,
}

enum WaitOutcome {
    Woken(Option<Wake>),
    Cancelled,
}

struct QueueState<M> {
    items: VecDeque<QueueItem<M>>,
    closed: bool,
    waiter: Option<oneshot::Sender<Wake>>,
}

impl<M> QueueState<M> {
    fn wake(&mut self, wake: Wake) {
        if let Some(tx) = self.waiter.take() {
            let _ = tx.send(wake);
        }
    }

    /// Dequeue the next batch according to the head item.
    fn collect_batch(&mut self) -> Option<Batch<M>> {
        let head = self.items.pop_front()?;

        if head.isolate {
            return Some(Batch {
                message: head.message,
                mode: head.mode,
                hash: head.mode_hash,
                isolate: true,
            });
        }

        let mut message = head.message;
        let mut joined = 1;
        while self
            .items
            .front()
            .is_some_and(|next| !next.isolate && next.mode_hash == head.mode_hash)
        {
            let Some(next) = self.items.pop_front() else {
                break;
            };
            message.push('\n');
            message.push_str(&next.message);
            joined += 1;
        }

        trace!(joined, remaining = self.items.len(), "collected batch");

        Some(Batch {
            message,
            mode: head.mode,
            hash: head.mode_hash,
            isolate: false,
        })
    }
}

/// Outbound queue that batches instructions by mode-equivalence class.
pub struct ModeAwareQueue<M> {
    state: Mutex<QueueState<M>>,
    hash: ModeHashFn<M>,
    on_message: Option<MessageHook<M>>,
}

impl<M> ModeAwareQueue<M> {
    /// Create a queue using `hash` to define mode equivalence.
    pub fn new(hash: impl Fn(&M) -> String + Send + Sync + 'static) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                waiter: None,
            }),
            hash: Arc::new(hash),
            on_message: None,
        }
    }

    /// Register a side-effect hook called with each accepted message.
    pub fn with_on_message(mut self, hook: impl Fn(&str, &M) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn item(&self, message: String, mode: M, isolate: bool) -> QueueItem<M> {
        let mode_hash = (self.hash)(&mode);
        QueueItem {
            message,
            mode,
            mode_hash,
            isolate,
        }
    }

    fn notify_hook(&self, message: &str, mode: &M) {
        if let Some(hook) = &self.on_message {
            hook(message, mode);
        }
    }

    /// Append an instruction.
    pub fn push(&self, message: impl Into<String>, mode: M) -> QueueResult<()> {
        self.enqueue("push", message.into(), mode, false, |state, item| {
            state.items.push_back(item);
        })
    }

    /// Append an instruction the caller wants handled promptly.
    ///
    /// Delivery is identical to [`push`](Self::push); the separate entry
    /// point records intent at the call site.
    pub fn push_immediate(&self, message: impl Into<String>, mode: M) -> QueueResult<()> {
        self.enqueue("push_immediate", message.into(), mode, false, |state, item| {
            state.items.push_back(item);
        })
    }

    /// Discard every queued instruction and enqueue one that must run alone.
    pub fn push_isolate_and_clear(&self, message: impl Into<String>, mode: M) -> QueueResult<()> {
        self.enqueue(
            "push_isolate_and_clear",
            message.into(),
            mode,
            true,
            |state, item| {
                let discarded = state.items.len();
                state.items.clear();
                state.items.push_back(item);
                if discarded > 0 {
                    debug!(discarded, "isolated instruction cleared queued backlog");
                }
            },
        )
    }

    /// Prepend an instruction so it is delivered next.
    pub fn unshift(&self, message: impl Into<String>, mode: M) -> QueueResult<()> {
        self.enqueue("unshift", message.into(), mode, false, |state, item| {
            state.items.push_front(item);
        })
    }

    fn enqueue(
        &self,
        operation: &'static str,
        message: String,
        mode: M,
        isolate: bool,
        insert: impl FnOnce(&mut QueueState<M>, QueueItem<M>),
    ) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::closed(operation));
        }
        self.notify_hook(&message, &mode);

        let item = self.item(message, mode, isolate);
        let mut state = self.lock();
        if state.closed {
            return Err(QueueError::closed(operation));
        }
        insert(&mut state, item);
        state.wake(Wake::Item);
        Ok(())
    }

    /// Drop all items and reopen the queue.
    pub fn reset(&self) {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        state.closed = false;
        debug!(dropped, "queue reset");
    }

    /// Close the queue. Later mutators fail and a pending waiter resolves to `None`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.wake(Wake::Closed);
        debug!(remaining = state.items.len(), "queue closed");
    }

    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Wait for the next batch.
    ///
    /// Returns immediately when items are queued. Otherwise returns `None`
    /// immediately if the queue is closed or `cancel` has already fired, and
    /// suspends until a push, `close()` or cancellation resolves the wait.
    /// Cancelling leaves queued items untouched.
    pub async fn wait_for_batch(&self, cancel: Option<&CancellationToken>) -> Option<Batch<M>> {
        loop {
            let mut rx = {
                let mut state = self.lock();
                if let Some(batch) = state.collect_batch() {
                    return Some(batch);
                }
                if state.closed || cancel.is_some_and(CancellationToken::is_cancelled) {
                    return None;
                }
                let (tx, rx) = oneshot::channel();
                state.waiter = Some(tx);
                rx
            };

            let outcome = match cancel {
                Some(token) => tokio::select! {
                    wake = &mut rx => WaitOutcome::Woken(wake.ok()),
                    () = token.cancelled() => WaitOutcome::Cancelled,
                },
                None => WaitOutcome::Woken((&mut rx).await.ok()),
            };
            drop(rx);

            match outcome {
                WaitOutcome::Woken(Some(Wake::Item)) => continue,
                WaitOutcome::Woken(Some(Wake::Closed)) => return None,
                WaitOutcome::Woken(None) => {
                    debug!("queue waiter superseded");
                    return None;
                }
                WaitOutcome::Cancelled => {
                    let mut state = self.lock();
                    if state.waiter.as_ref().is_some_and(oneshot::Sender::is_closed) {
                        state.waiter = None;
                    }
                    trace!("batch wait cancelled");
                    return None;
                }
            }
        }
    }
}
