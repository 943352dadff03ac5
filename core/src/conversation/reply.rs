use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::BoxError;

/// What a reply listener wants after seeing a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationAction {
    /// Stay registered; more replies (from other responders) may follow.
    ContinueListening,
    /// Unregister and cancel the timeout.
    StopListening,
}

/// A responder's decision about answering one request.
pub enum ConversationReply<R> {
    NoReply,
    Value(R),
    /// Sent once the future resolves to `Ok(Some(_))`. `Ok(None)` and errors send nothing.
    Deferred(BoxFuture<'static, Result<Option<R>, BoxError>>),
}

impl<R> ConversationReply<R> {
    pub fn no_reply() -> Self {
        ConversationReply::NoReply
    }

    pub fn of(reply: R) -> Self {
        ConversationReply::Value(reply)
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Option<R>, BoxError>> + Send + 'static,
    {
        ConversationReply::Deferred(future.boxed())
    }

    pub fn has_reply(&self) -> bool {
        !matches!(self, ConversationReply::NoReply)
    }
}

impl<R: fmt::Debug> fmt::Debug for ConversationReply<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationReply::NoReply => f.write_str("NoReply"),
            ConversationReply::Value(reply) => f.debug_tuple("Value").field(reply).finish(),
            ConversationReply::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Observes the replies to one outgoing request.
pub trait ConversationReplyListener<R>: Send + Sync + 'static {
    fn on_reply(&self, reply: &R) -> RegistrationAction;

    /// Called once if the timeout fires first, with every reply seen so far.
    fn on_timeout(&self, replies: Vec<R>);
}

struct FnReplyListener<F, G> {
    on_reply: F,
    on_timeout: G,
}

impl<R, F, G> ConversationReplyListener<R> for FnReplyListener<F, G>
where
    F: Fn(&R) -> RegistrationAction + Send + Sync + 'static,
    G: Fn(Vec<R>) + Send + Sync + 'static,
{
    fn on_reply(&self, reply: &R) -> RegistrationAction {
        (self.on_reply)(reply)
    }

    fn on_timeout(&self, replies: Vec<R>) {
        (self.on_timeout)(replies)
    }
}

/// Reply listener from a closure; timeouts are ignored.
pub fn reply_listener<R, F>(on_reply: F) -> impl ConversationReplyListener<R>
where
    R: 'static,
    F: Fn(&R) -> RegistrationAction + Send + Sync + 'static,
{
    FnReplyListener {
        on_reply,
        on_timeout: |_replies: Vec<R>| {},
    }
}

pub fn reply_listener_with_timeout<R, F, G>(on_reply: F, on_timeout: G) -> impl ConversationReplyListener<R>
where
    R: 'static,
    F: Fn(&R) -> RegistrationAction + Send + Sync + 'static,
    G: Fn(Vec<R>) + Send + Sync + 'static,
{
    FnReplyListener {
        on_reply,
        on_timeout,
    }
}
