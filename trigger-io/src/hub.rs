use std::{any::Any, collections::HashMap, sync::Arc};

use log::debug;
use parking_lot::RwLock;

use crate::{
    IoError, MessageReceiver, MessageSender, SignalPublisher, SignalSource,
    queue::{self, QueueReceiver, QueueSender},
    signal::SignalChannel,
};

type Endpoint = Arc<dyn Any + Send + Sync>;

struct QueueEndpoints<T> {
    sender: QueueSender<T>,
    receiver: QueueReceiver<T>,
}

/// Registry of named in-process connections, shared by every module of an application.
///
/// Queues and signals live in separate namespaces; each name carries exactly one message
/// type and asking for it with another type is an error.
#[derive(Default)]
pub struct ConnectionHub {
    queues: RwLock<HashMap<String, Endpoint>>,
    signals: RwLock<HashMap<String, Endpoint>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_queue<T: Send + 'static>(
        &self,
        name: &str,
        capacity: usize,
    ) -> Result<(), IoError> {
        if capacity == 0 {
            return Err(IoError::ZeroCapacity {
                name: name.to_string(),
            });
        }
        let mut queues = self.queues.write();
        if queues.contains_key(name) {
            return Err(IoError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        let (sender, receiver) = queue::bounded::<T>(name, capacity);
        queues.insert(name.to_string(), Arc::new(QueueEndpoints { sender, receiver }));
        debug!("registered queue {} (capacity {})", name, capacity);
        Ok(())
    }

    pub fn register_signal<T: Send + 'static>(
        &self,
        name: &str,
        capacity: usize,
    ) -> Result<(), IoError> {
        if capacity == 0 {
            return Err(IoError::ZeroCapacity {
                name: name.to_string(),
            });
        }
        let mut signals = self.signals.write();
        if signals.contains_key(name) {
            return Err(IoError::AlreadyRegistered {
                name: name.to_string(),
            });
        }
        signals.insert(
            name.to_string(),
            Arc::new(SignalChannel::<T>::new(name, capacity)),
        );
        debug!("registered signal {} (capacity {})", name, capacity);
        Ok(())
    }

    pub fn sender<T: Send + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<dyn MessageSender<T>>, IoError> {
        self.queue_sender(name)
            .map(|sender| Arc::new(sender) as Arc<dyn MessageSender<T>>)
    }

    pub fn receiver<T: Send + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<dyn MessageReceiver<T>>, IoError> {
        self.queue_receiver(name)
            .map(|receiver| Arc::new(receiver) as Arc<dyn MessageReceiver<T>>)
    }

    pub fn queue_sender<T: Send + 'static>(&self, name: &str) -> Result<QueueSender<T>, IoError> {
        self.with_queue(name, |endpoints: &QueueEndpoints<T>| endpoints.sender.clone())
    }

    pub fn queue_receiver<T: Send + 'static>(
        &self,
        name: &str,
    ) -> Result<QueueReceiver<T>, IoError> {
        self.with_queue(name, |endpoints: &QueueEndpoints<T>| {
            endpoints.receiver.clone()
        })
    }

    pub fn signal<T: Send + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<dyn SignalSource<T>>, IoError> {
        self.signal_channel::<T>(name)
            .map(|channel| channel as Arc<dyn SignalSource<T>>)
    }

    pub fn signal_publisher<T: Send + 'static>(
        &self,
        name: &str,
    ) -> Result<SignalPublisher<T>, IoError> {
        self.signal_channel::<T>(name)
            .map(|channel| channel.publisher())
    }

    fn signal_channel<T: Send + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<SignalChannel<T>>, IoError> {
        let endpoint = self
            .signals
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| IoError::UnknownConnection {
                name: name.to_string(),
            })?;
        endpoint
            .downcast::<SignalChannel<T>>()
            .map_err(|_| IoError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    fn with_queue<T: Send + 'static, R>(
        &self,
        name: &str,
        f: impl FnOnce(&QueueEndpoints<T>) -> R,
    ) -> Result<R, IoError> {
        let queues = self.queues.read();
        let endpoint = queues.get(name).ok_or_else(|| IoError::UnknownConnection {
            name: name.to_string(),
        })?;
        let endpoints = endpoint
            .downcast_ref::<QueueEndpoints<T>>()
            .ok_or_else(|| IoError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })?;
        Ok(f(endpoints))
    }
}
