use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::channel::Channel;

/// Periodically publishes a supplied message on a channel until closed.
///
/// The first message goes out one `period` after [`ChannelPublisher::start`].
/// Dropping the publisher stops it as well.
pub struct ChannelPublisher<T> {
    channel: Channel<T>,
    task: JoinHandle<()>,
}

impl<T: Send + Sync + 'static> ChannelPublisher<T> {
    pub fn start<F>(channel: Channel<T>, period: Duration, supplier: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        // interval() rejects a zero period
        let period = period.max(Duration::from_millis(1));
        let target = channel.clone();
        let task = channel.runtime().spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if target.is_closed() {
                    debug!(target: "messenger", channel = %target.name(), "Channel closed; publisher stopping");
                    break;
                }
                let message = supplier();
                if let Err(err) = target.send(&message).await {
                    warn!(target: "messenger", channel = %target.name(), error = %err, "Periodic publish failed");
                }
            }
        });
        Self { channel, task }
    }

    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl<T> Drop for ChannelPublisher<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}
