use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use super::reply::{ConversationReplyListener, RegistrationAction};
use super::ConversationId;
use crate::messaging::panic_message;

pub(crate) type PendingTable<R> = DashMap<ConversationId, Arc<PendingReply<R>>>;

/// Outcome of offering a reply to a pending record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Listener asked for more replies, or the reply was queued behind one in delivery
    Continue,
    /// This reply settled the record
    Settled,
    /// The deadline passed during delivery and the timeout was handed over here
    TimedOut,
    /// Record was already settled (stopped, timed out or cancelled)
    Ignored,
}

struct PendingState<R> {
    replies: Vec<R>,
    settled: bool,
    // a thread is running on_reply; others queue behind it
    delivering: bool,
    queued: VecDeque<R>,
    // deadline passed while delivering
    expired: bool,
    timer: Option<JoinHandle<()>>,
}

/// Live correlation record for one outstanding request.
///
/// Settling is a single claim under the record's lock: whichever of
/// {terminating reply, timeout, cancel} gets there first wins and the others
/// become no-ops. The lock is never held while listener code runs, so a listener
/// may close its conversation and a timeout never waits behind a reply.
pub(crate) struct PendingReply<R> {
    id: ConversationId,
    listener: Box<dyn ConversationReplyListener<R>>,
    deadline: Instant,
    state: Mutex<PendingState<R>>,
}

impl<R: Send + 'static> PendingReply<R> {
    pub(crate) fn new(
        id: ConversationId,
        listener: Box<dyn ConversationReplyListener<R>>,
        deadline: Instant,
    ) -> Self {
        Self {
            id,
            listener,
            deadline,
            state: Mutex::new(PendingState {
                replies: Vec::new(),
                settled: false,
                delivering: false,
                queued: VecDeque::new(),
                expired: false,
                timer: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingState<R>> {
        // listener code never runs under the lock
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.lock().settled
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Attaches the timeout task; aborts it straight away if already settled.
    pub(crate) fn arm(&self, timer: JoinHandle<()>) {
        let mut state = self.lock();
        if state.settled {
            timer.abort();
        } else {
            state.timer = Some(timer);
        }
    }

    /// Hands `reply` to the listener.
    ///
    /// Replies arriving while another is in delivery are queued and delivered in
    /// order by the thread already delivering, so `on_reply` never runs twice at
    /// once for the same record.
    pub(crate) fn offer(&self, reply: R) -> Offer {
        {
            let mut state = self.lock();
            if state.settled {
                return Offer::Ignored;
            }
            if state.delivering {
                state.queued.push_back(reply);
                return Offer::Continue;
            }
            state.delivering = true;
        }

        let mut next = reply;
        loop {
            let action = self.notify_reply(&next);

            let mut state = self.lock();
            state.delivering = false;
            if state.settled {
                // cancelled while the listener ran
                state.queued.clear();
                return Offer::Ignored;
            }
            if action == RegistrationAction::StopListening {
                state.settled = true;
                state.queued.clear();
                if let Some(timer) = state.timer.take() {
                    timer.abort();
                }
                return Offer::Settled;
            }
            state.replies.push(next);

            if state.expired {
                state.settled = true;
                state.timer = None;
                let dropped = state.queued.len();
                state.queued.clear();
                let replies = std::mem::take(&mut state.replies);
                drop(state);
                if dropped > 0 {
                    debug!(target: "conversation", conversation_id = %self.id, dropped, "Queued replies dropped at timeout");
                }
                self.notify_timeout(replies);
                return Offer::TimedOut;
            }
            match state.queued.pop_front() {
                Some(queued) => {
                    state.delivering = true;
                    next = queued;
                }
                None => return Offer::Continue,
            }
        }
    }

    /// Settles on timeout and hands collected replies to the listener.
    ///
    /// Returns false if a reply or cancel settled the record first, or if a reply
    /// is in delivery; the delivering thread then finishes the timeout itself.
    pub(crate) fn expire(&self) -> bool {
        let replies = {
            let mut state = self.lock();
            if state.settled {
                return false;
            }
            if state.delivering {
                state.expired = true;
                return false;
            }
            state.settled = true;
            state.timer = None;
            std::mem::take(&mut state.replies)
        };
        self.notify_timeout(replies);
        true
    }

    fn notify_reply(&self, reply: &R) -> RegistrationAction {
        catch_unwind(AssertUnwindSafe(|| self.listener.on_reply(reply))).unwrap_or_else(|panic| {
            error!(
                target: "conversation",
                conversation_id = %self.id,
                panic = %panic_message(panic.as_ref()),
                "Reply listener panicked; unregistering"
            );
            RegistrationAction::StopListening
        })
    }

    fn notify_timeout(&self, replies: Vec<R>) {
        debug!(target: "conversation", conversation_id = %self.id, replies = replies.len(), "Conversation timed out");
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.listener.on_timeout(replies))) {
            error!(
                target: "conversation",
                conversation_id = %self.id,
                panic = %panic_message(panic.as_ref()),
                "Timeout listener panicked"
            );
        }
    }

    /// Settles without notifying the listener.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = self.lock();
        if state.settled {
            return false;
        }
        state.settled = true;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        true
    }
}

// roughly 30 years, what tokio itself treats as "never"
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `timeout` from now, clamped to a far-future instant when it would overflow.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Removes `id` from the table only if it still maps to `record`.
pub(crate) fn remove_record<R>(table: &PendingTable<R>, id: &ConversationId, record: &Arc<PendingReply<R>>) {
    table.remove_if(id, |_, current| Arc::ptr_eq(current, record));
}

/// Timer body: waits for the deadline, then races replies for the record.
pub(crate) async fn expire_at<R: Send + 'static>(
    table: Arc<PendingTable<R>>,
    id: ConversationId,
    record: Arc<PendingReply<R>>,
) {
    sleep_until(record.deadline()).await;
    if record.expire() {
        remove_record(&table, &id, &record);
    }
}
