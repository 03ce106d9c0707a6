//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus distributes [`BusEvent`](crate::BusEvent)s to every subscriber. It makes
//! minimal assumptions:
//!
//! - **Transport-agnostic**: in-memory channels here; any broker could sit behind the trait
//! - **At-least-once delivery**: events may be delivered more than once, so every
//!   consumer (dispatch, sweep, completion) must tolerate duplicates
//! - **No ordering guarantees** between publishers: a worker's state change and a
//!   concurrently published sweep tick may arrive in either order
//! - **No persistence**: the job registry and continuation store are the source of truth

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published after it was created
/// (broadcast semantics). Intended for one consuming thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_millis(250)) {
///         Ok(event) => route(event),
///         Err(RecvTimeoutError::Timeout) => continue, // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // bus closed
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Domain-agnostic pub/sub bus.
///
/// `publish()` can fail (e.g. poisoned lock, broker unavailable); failures are
/// surfaced to the publisher. Implementations must be shareable across threads.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
