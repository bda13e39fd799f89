//! Utilities useful for actor implementations.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Watches a tokio `UnboundedReceiver` for a message, and when a message is received sends that
/// message to the actor via the `received_message` transformation function.
pub fn notify_on_unbounded_recv<RecvMessage, ActorMessage>(
    mut receiver: UnboundedReceiver<RecvMessage>,
    actor_channel: UnboundedSender<ActorMessage>,
    received_message: impl Fn(RecvMessage) -> ActorMessage + Send + 'static,
    closed_message: impl FnOnce() -> ActorMessage + Send + 'static,
) where
    RecvMessage: Send + 'static,
    ActorMessage: Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = receiver.recv() => {
                    match received {
                        Some(msg) => {
                            let actor_msg = received_message(msg);
                            let _ = actor_channel.send(actor_msg);
                        }

                        None => {
                            let actor_msg = closed_message();
                            let _ = actor_channel.send(actor_msg);
                            break;
                        }
                    }
                }

                _ = actor_channel.closed() => {
                    break;
                }
            }
        }
    });
}

/// Allows notifying an actor when any arbitrary future is resolved.
pub fn notify_on_future_completion<FutureResult, ActorMessage>(
    future: impl Future<Output = FutureResult> + Send + 'static,
    actor_channel: UnboundedSender<ActorMessage>,
    completion_message: impl FnOnce(FutureResult) -> ActorMessage + Send + 'static,
) where
    FutureResult: Send + 'static,
    ActorMessage: Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            result = future => {
                let actor_msg = completion_message(result);
                let _ = actor_channel.send(actor_msg);
            }

            _ = actor_channel.closed() => {
                // Can't send a message so just end
            }
        }
    });
}

/// A message that will be sent to an actor after a delay, unless cancelled first. Cancelling
/// is idempotent, and dropping the task cancels it.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn schedule<ActorMessage>(
        delay: Duration,
        actor_channel: UnboundedSender<ActorMessage>,
        message: impl FnOnce() -> ActorMessage + Send + 'static,
    ) -> Self
    where
        ActorMessage: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = actor_channel.send(message());
                }

                _ = actor_channel.closed() => {
                    // Actor is gone so nothing to notify
                }
            }
        });

        ScheduledTask {
            handle: Some(handle),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// True until the task either fired or was cancelled
    pub fn is_pending(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Holds at most one scheduled task. Every schedule or cancel moves the slot to a new
/// generation, and the scheduled message carries the generation it was created for. A message
/// that was already queued when its task got cancelled or replaced therefore fails
/// [`TimerSlot::fire`] and can be ignored.
#[derive(Debug, Default)]
pub struct TimerSlot {
    task: Option<ScheduledTask>,
    generation: u64,
}

impl TimerSlot {
    /// Schedules a message, replacing any task already in the slot
    pub fn schedule<ActorMessage>(
        &mut self,
        delay: Duration,
        actor_channel: UnboundedSender<ActorMessage>,
        message: impl FnOnce(u64) -> ActorMessage + Send + 'static,
    ) where
        ActorMessage: Send + 'static,
    {
        self.cancel();

        let generation = self.generation;
        let task = ScheduledTask::schedule(delay, actor_channel, move || message(generation));
        self.task = Some(task);
    }

    pub fn cancel(&mut self) {
        if let Some(mut task) = self.task.take() {
            task.cancel();
        }

        self.generation += 1;
    }

    pub fn is_scheduled(&self) -> bool {
        self.task.is_some()
    }

    /// Called when a scheduled message arrives. Returns true if the message belongs to the
    /// task currently in the slot, emptying the slot; false if it is stale.
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.task.is_none() || generation != self.generation {
            return false;
        }

        self.task = None;
        self.generation += 1;
        true
    }
}
