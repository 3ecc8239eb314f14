//! Actor driver.
//!
//! Every resolver and the materialiser run as one tokio task draining an
//! unbounded mailbox. Messages to one actor are processed strictly one at a
//! time; different actors run concurrently. A handler error is fatal to the
//! whole query: the driver logs it, terminates the registry and stops. A
//! handler panic is reported the same way, as an illegal state.

use crate::message::{Message, ResolverId};
use crate::registry::Registry;
use crate::{ReasonerError, Result};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, trace};

pub(crate) type Mailbox = UnboundedSender<Message>;

pub(crate) trait Actor: Send + 'static {
    fn id(&self) -> ResolverId;

    fn name(&self) -> &str;

    fn handle(&mut self, message: Message) -> Result<()>;

    /// Iteration in which this actor currently has a blocked request.
    fn blocked_in(&self) -> Option<u32> {
        None
    }

    /// Release held resources. Called once, when the actor stops.
    fn terminate(&mut self) {}
}

pub(crate) fn spawn<A: Actor>(registry: Arc<Registry>, mut actor: A, mut mailbox: UnboundedReceiver<Message>) {
    let runtime = registry.runtime().clone();
    runtime.spawn(async move {
        debug!(actor = actor.name(), id = %actor.id(), "actor started");
        while let Some(message) = mailbox.recv().await {
            if matches!(message, Message::Terminate) || registry.is_terminated() {
                break;
            }
            trace!(actor = actor.name(), message = message.kind(), "received");
            let outcome = match catch_unwind(AssertUnwindSafe(|| actor.handle(message))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let reason = panic_message(payload.as_ref());
                    error!(actor = actor.name(), panic = %reason, "actor panicked, terminating resolution");
                    registry.terminate(ReasonerError::IllegalState(format!(
                        "{} panicked: {reason}",
                        actor.name()
                    )));
                    break;
                }
            };
            registry.set_blocked(actor.id(), actor.blocked_in());
            if let Err(err) = outcome {
                error!(actor = actor.name(), error = %err, "actor failed, terminating resolution");
                registry.terminate(err);
                break;
            }
        }
        actor.terminate();
        debug!(actor = actor.name(), "actor stopped");
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
