//! Fan-out of messages to independent subscribers.
//!
//! Every subscriber owns a bounded queue. Publishing waits until each live
//! subscriber has accepted the message, so a slow consumer applies
//! back-pressure to the publisher.

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic is closed")]
    Closed,

    #[error("publish cancelled")]
    Cancelled,
}

struct Registry<T> {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<T>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    buffer: usize,
}

impl<T> Registry<T> {
    fn remove(&self, id: u64) {
        self.subscribers.lock().remove(&id);
    }
}

pub struct Topic<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a topic whose subscribers each buffer up to `buffer` messages.
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                buffer: buffer.max(1),
            }),
        }
    }

    /// Deliver `message` to every current subscriber.
    ///
    /// Subscribers whose stream has gone away are pruned.
    pub async fn publish(&self, message: T) -> Result<(), TopicError> {
        if self.registry.closed.load(Ordering::Acquire) {
            return Err(TopicError::Closed);
        }

        let targets: Vec<(u64, mpsc::Sender<T>)> = self
            .registry
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let sends = targets.into_iter().map(|(id, tx)| {
            let message = message.clone();
            async move { tx.send(message).await.err().map(|_| id) }
        });

        for id in join_all(sends).await.into_iter().flatten() {
            self.registry.remove(id);
        }
        Ok(())
    }

    /// Like [`Topic::publish`], giving up when `cancel` fires.
    pub async fn publish_until(
        &self,
        message: T,
        cancel: &CancellationToken,
    ) -> Result<(), TopicError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(TopicError::Cancelled),
            result = self.publish(message) => result,
        }
    }

    pub fn subscribe(&self) -> Stream<T> {
        let (tx, rx) = mpsc::channel(self.registry.buffer);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);

        if !self.registry.closed.load(Ordering::Acquire) {
            self.registry.subscribers.lock().insert(id, tx);
        }

        Stream {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }

    /// Drop every subscriber queue; open streams drain and then end.
    pub fn close(&self) {
        self.registry.closed.store(true, Ordering::Release);
        self.registry.subscribers.lock().clear();
    }
}

/// A subscription. Dropping it unsubscribes.
pub struct Stream<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Stream<T> {
    /// Next message, or `None` once unsubscribed or the topic is closed.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn channel(&mut self) -> &mut mpsc::Receiver<T> {
        &mut self.rx
    }

    pub fn unsubscribe(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
        self.rx.close();
    }
}

impl<T> Drop for Stream<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
