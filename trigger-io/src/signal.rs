use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{debug, error};
use parking_lot::Mutex;

use crate::{
    IoError, MessageReceiver, MessageSender, ReceiveError, SendError, SignalHandler,
    SignalSource,
    queue::{self, QueueReceiver, QueueSender},
};

const DISPATCH_POLL: Duration = Duration::from_millis(50);

/// Inbound signal delivered to a single subscriber on a dedicated dispatcher thread.
///
/// Messages published while nobody is subscribed stay queued and are handed to the next
/// subscriber. The channel owns a publisher for its whole life, so the dispatcher never
/// observes a disconnect.
pub struct SignalChannel<T> {
    name: String,
    publisher: QueueSender<T>,
    inbound: QueueReceiver<T>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

struct Dispatcher {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl<T: Send + 'static> SignalChannel<T> {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let name = name.into();
        let (publisher, inbound) = queue::bounded(name.clone(), capacity);
        Self {
            name,
            publisher,
            inbound,
            dispatcher: Mutex::new(None),
        }
    }

    pub fn publisher(&self) -> SignalPublisher<T> {
        SignalPublisher {
            inner: self.publisher.clone(),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.dispatcher.lock().is_some()
    }
}

impl<T: Send + 'static> SignalSource<T> for SignalChannel<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self, handler: SignalHandler<T>) -> Result<(), IoError> {
        let mut guard = self.dispatcher.lock();
        if guard.is_some() {
            return Err(IoError::AlreadySubscribed {
                name: self.name.clone(),
            });
        }
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let inbound = self.inbound.clone();
        let label = self.name.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-cb", self.name))
            .spawn(move || {
                while !stop_clone.load(Ordering::Acquire) {
                    match inbound.try_receive(DISPATCH_POLL) {
                        Ok(message) => handler(message),
                        Err(ReceiveError::Timeout(_)) => continue,
                        Err(ReceiveError::Disconnected(_)) => break,
                    }
                }
                debug!("[{}] signal dispatcher exiting", label);
            })
            .map_err(|err| IoError::Spawn {
                name: self.name.clone(),
                reason: err.to_string(),
            })?;
        *guard = Some(Dispatcher { stop, handle });
        Ok(())
    }

    fn unsubscribe(&self) {
        let Some(dispatcher) = self.dispatcher.lock().take() else {
            return;
        };
        dispatcher.stop.store(true, Ordering::Release);
        if dispatcher.handle.join().is_err() {
            error!("[{}] signal handler panicked", self.name);
        }
    }
}

impl<T> Drop for SignalChannel<T> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.get_mut().take() {
            dispatcher.stop.store(true, Ordering::Release);
            let _ = dispatcher.handle.join();
        }
    }
}

/// Publishing half handed to the component that emits the signal.
pub struct SignalPublisher<T> {
    inner: QueueSender<T>,
}

impl<T> Clone for SignalPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> MessageSender<T> for SignalPublisher<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send(&self, item: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.inner.send(item, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_for(predicate: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if predicate() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn handler_runs_on_dispatcher_thread() {
        let channel = SignalChannel::<u32>::new("busy", 8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        channel
            .subscribe(Box::new(move |value| {
                let name = thread::current().name().map(str::to_string);
                seen_clone.lock().push((value, name));
            }))
            .unwrap();
        channel.publisher().send(7, Duration::from_millis(5)).unwrap();
        assert!(wait_for(|| !seen.lock().is_empty()));
        let seen = seen.lock();
        assert_eq!(seen[0], (7, Some("busy-cb".to_string())));
        drop(seen);
        channel.unsubscribe();
        assert!(!channel.is_subscribed());
    }

    #[test]
    fn second_subscriber_is_rejected() {
        let channel = SignalChannel::<u32>::new("busy", 8);
        channel.subscribe(Box::new(|_| {})).unwrap();
        let err = channel.subscribe(Box::new(|_| {})).unwrap_err();
        assert_eq!(
            err,
            IoError::AlreadySubscribed {
                name: "busy".to_string()
            }
        );
        channel.unsubscribe();
    }

    #[test]
    fn messages_after_unsubscribe_wait_for_next_subscriber() {
        let channel = SignalChannel::<u32>::new("busy", 8);
        let count = Arc::new(AtomicUsize::new(0));
        let first = Arc::clone(&count);
        channel
            .subscribe(Box::new(move |_| {
                first.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        channel.unsubscribe();

        channel.publisher().send(1, Duration::from_millis(5)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let second = Arc::clone(&count);
        channel
            .subscribe(Box::new(move |_| {
                second.fetch_add(10, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) == 10));
        channel.unsubscribe();
    }
}
