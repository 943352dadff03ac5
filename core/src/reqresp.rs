//! Single-reply request/response on top of [`ConversationChannel`].

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, instrument};

use crate::conversation::{
    reply_listener_with_timeout, ConversationChannel, ConversationChannelAgent, ConversationId,
    ConversationMessage, ConversationReply, RegistrationAction,
};
use crate::messaging::Messenger;
use crate::{CourierError, Result};

/// Envelope carrying a request or response body under its conversation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReqRespMessage<T> {
    pub id: ConversationId,
    pub body: T,
}

impl<T> ReqRespMessage<T> {
    pub fn new(body: T) -> Self {
        Self::with_id(ConversationId::new(), body)
    }

    pub fn with_id(id: ConversationId, body: T) -> Self {
        Self { id, body }
    }
}

impl<T: Send + Sync + 'static> ConversationMessage for ReqRespMessage<T> {
    fn conversation_id(&self) -> Option<ConversationId> {
        Some(self.id)
    }

    fn set_conversation_id(&mut self, id: ConversationId) {
        self.id = id;
    }
}

type ResponseSender<T> = Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>;

fn take_sender<T>(sender: &ResponseSender<T>) -> Option<oneshot::Sender<Result<T>>> {
    sender.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Request/response façade: every request resolves to the first reply, or fails
/// with [`CourierError::Timeout`].
///
/// # Examples
///
/// ```no_run
/// # async fn example(messenger: &courier_core::Messenger) -> courier_core::Result<()> {
/// let echo = messenger.req_resp_channel::<String, String>("echo")?;
/// echo.response_handler(|req| Some(req.to_uppercase()))?;
/// let resp = echo.request("ping".to_string()).await?;
/// assert_eq!(resp, "PING");
/// # Ok(())
/// # }
/// ```
pub struct ReqRespChannel<Req, Resp> {
    conversation: ConversationChannel<ReqRespMessage<Req>, ReqRespMessage<Resp>>,
    timeout: Duration,
}

impl<Req, Resp> Clone for ReqRespChannel<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            conversation: self.conversation.clone(),
            timeout: self.timeout,
        }
    }
}

impl<Req, Resp> ReqRespChannel<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    Resp: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Uses the messenger's configured request timeout as the default.
    pub fn new(messenger: &Messenger, name: &str) -> Result<Self> {
        Ok(Self {
            conversation: ConversationChannel::new(messenger, name)?,
            timeout: messenger.config().request_timeout,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.conversation.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn conversation(&self) -> &ConversationChannel<ReqRespMessage<Req>, ReqRespMessage<Resp>> {
        &self.conversation
    }

    pub async fn request(&self, request: Req) -> Result<Resp> {
        self.request_with_timeout(request, self.timeout).await
    }

    #[instrument(target = "reqresp", skip(self, request), fields(channel = %self.conversation.name()))]
    pub async fn request_with_timeout(&self, request: Req, timeout: Duration) -> Result<Resp> {
        let message = ReqRespMessage::new(request);
        let id = message.id;

        let (tx, rx) = oneshot::channel();
        let on_reply: ResponseSender<Resp> = Arc::new(Mutex::new(Some(tx)));
        let on_timeout = Arc::clone(&on_reply);
        let listener = reply_listener_with_timeout(
            move |reply: &ReqRespMessage<Resp>| {
                if let Some(tx) = take_sender(&on_reply) {
                    let _ = tx.send(Ok(reply.body.clone()));
                }
                RegistrationAction::StopListening
            },
            move |_replies: Vec<ReqRespMessage<Resp>>| {
                if let Some(tx) = take_sender(&on_timeout) {
                    let _ = tx.send(Err(CourierError::Timeout(id)));
                }
            },
        );

        self.conversation.send_message(message, listener, timeout).await?;
        debug!(target: "reqresp", conversation_id = %id, "Awaiting response");

        // sender dropped without settling: the conversation was closed
        rx.await
            .unwrap_or_else(|_| Err(CourierError::ChannelClosed(self.conversation.name().to_string())))
    }

    /// Answers requests with `handler`; `None` sends no reply.
    pub fn response_handler<F>(
        &self,
        handler: F,
    ) -> Result<ConversationChannelAgent<ReqRespMessage<Req>, ReqRespMessage<Resp>>>
    where
        F: Fn(Req) -> Option<Resp> + Send + Sync + 'static,
    {
        let agent = self.conversation.new_agent()?;
        agent.add_listener_fn(move |_agent, request: &ReqRespMessage<Req>| {
            match handler(request.body.clone()) {
                Some(body) => ConversationReply::of(ReqRespMessage::with_id(request.id, body)),
                None => ConversationReply::no_reply(),
            }
        })?;
        Ok(agent)
    }

    /// Like [`ReqRespChannel::response_handler`] for handlers that answer later.
    pub fn async_response_handler<F, Fut>(
        &self,
        handler: F,
    ) -> Result<ConversationChannelAgent<ReqRespMessage<Req>, ReqRespMessage<Resp>>>
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Resp>> + Send + 'static,
    {
        let agent = self.conversation.new_agent()?;
        agent.add_listener_fn(move |_agent, request: &ReqRespMessage<Req>| {
            let id = request.id;
            let response = handler(request.body.clone());
            ConversationReply::deferred(async move {
                Ok(response.await.map(|body| ReqRespMessage::with_id(id, body)))
            })
        })?;
        Ok(agent)
    }

    pub fn close(&self) {
        self.conversation.close();
    }
}

impl Messenger {
    /// Shorthand for [`ReqRespChannel::new`].
    pub fn req_resp_channel<Req, Resp>(&self, name: &str) -> Result<ReqRespChannel<Req, Resp>>
    where
        Req: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        Resp: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        ReqRespChannel::new(self, name)
    }
}
