// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Transport seams used by the trigger modules.
//!
//! Modules only see three primitives: a pull-style receive with timeout
//! ([`MessageReceiver`]), a push-style send with timeout ([`MessageSender`]), and an
//! asynchronous subscription to an inbound signal ([`SignalSource`]). The in-process
//! implementations are bounded channels ([`queue`]) and a callback channel with its own
//! dispatcher thread ([`signal`]); [`ConnectionHub`] resolves them by connection name.

pub mod hub;
pub mod queue;
pub mod signal;

use std::time::Duration;

use thiserror::Error;

pub use hub::ConnectionHub;
pub use queue::{QueueReceiver, QueueSender, bounded};
pub use signal::{SignalChannel, SignalPublisher};

pub trait MessageReceiver<T>: Send + Sync {
    fn name(&self) -> &str;
    /// Blocks up to `timeout` for the next item.
    fn try_receive(&self, timeout: Duration) -> Result<T, ReceiveError>;
}

pub trait MessageSender<T>: Send + Sync {
    fn name(&self) -> &str;
    /// Blocks up to `timeout` for room; the item is handed back on failure.
    fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>>;
}

pub type SignalHandler<T> = Box<dyn Fn(T) + Send + Sync + 'static>;

pub trait SignalSource<T>: Send + Sync {
    fn name(&self) -> &str;
    /// Installs `handler`; it runs on a context owned by the source, never the caller's.
    fn subscribe(&self, handler: SignalHandler<T>) -> Result<(), IoError>;
    /// Removes the handler and waits for any in-flight invocation to finish.
    fn unsubscribe(&self);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("receive timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection {0} is disconnected")]
    Disconnected(String),
}

#[derive(Debug, Error)]
pub enum SendError<T> {
    #[error("send to {connection} timed out after {timeout:?}")]
    Timeout {
        connection: String,
        timeout: Duration,
        item: T,
    },
    #[error("connection {connection} is disconnected")]
    Disconnected { connection: String, item: T },
}

impl<T> SendError<T> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, SendError::Timeout { .. })
    }

    pub fn into_item(self) -> T {
        match self {
            SendError::Timeout { item, .. } | SendError::Disconnected { item, .. } => item,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IoError {
    #[error("unknown connection {name}")]
    UnknownConnection { name: String },
    #[error("connection {name} does not carry {expected}")]
    TypeMismatch { name: String, expected: &'static str },
    #[error("connection {name} is already registered")]
    AlreadyRegistered { name: String },
    #[error("connection {name} already has a subscriber")]
    AlreadySubscribed { name: String },
    #[error("connection {name} must have a positive capacity")]
    ZeroCapacity { name: String },
    #[error("failed to spawn dispatcher for {name}: {reason}")]
    Spawn { name: String, reason: String },
}
