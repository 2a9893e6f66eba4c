use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};

use crate::{MessageReceiver, MessageSender, ReceiveError, SendError};

/// Bounded multi-producer multi-consumer queue named `name`.
pub fn bounded<T>(name: impl Into<String>, capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let name: Arc<str> = Arc::from(name.into());
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (
        QueueSender {
            name: Arc::clone(&name),
            tx,
        },
        QueueReceiver { name, rx },
    )
}

pub struct QueueSender<T> {
    name: Arc<str>,
    tx: Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T: Send> MessageSender<T> for QueueSender<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.tx.send_timeout(item, timeout).map_err(|err| match err {
            SendTimeoutError::Timeout(item) => SendError::Timeout {
                connection: self.name.to_string(),
                timeout,
                item,
            },
            SendTimeoutError::Disconnected(item) => SendError::Disconnected {
                connection: self.name.to_string(),
                item,
            },
        })
    }
}

pub struct QueueReceiver<T> {
    name: Arc<str>,
    rx: Receiver<T>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            rx: self.rx.clone(),
        }
    }
}

impl<T> QueueReceiver<T> {
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<T> {
        self.rx.try_iter().collect()
    }
}

impl<T: Send> MessageReceiver<T> for QueueReceiver<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_receive(&self, timeout: Duration) -> Result<T, ReceiveError> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ReceiveError::Timeout(timeout),
            RecvTimeoutError::Disconnected => ReceiveError::Disconnected(self.name.to_string()),
        })
    }
}
