//! Observer lists
//!
//! Producers (normalizer, bar engine, replayer) fan events out to two kinds
//! of consumers: synchronous callbacks, invoked in registration order before
//! `notify` returns, and tokio channel subscribers, which decouple the
//! consumer's cadence from the producer's. Each event reaches each consumer
//! exactly once and in emission order.

use std::fmt;

use tokio::sync::mpsc;

/// Boxed synchronous observer.
pub type Callback<T> = Box<dyn FnMut(&T) + Send>;

pub struct Observers<T> {
    callbacks: Vec<Callback<T>>,
    channels: Vec<mpsc::UnboundedSender<T>>,
}

impl<T: Clone> Observers<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Vec::new(),
            channels: Vec::new(),
        }
    }

    /// Register a callback.
    pub fn register<F>(&mut self, callback: F)
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Open a channel subscription. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.push(tx);
        rx
    }

    /// Deliver one event to every observer.
    pub fn notify(&mut self, event: &T) {
        for callback in self.callbacks.iter_mut() {
            callback(event);
        }
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Deliver a sequence of events in order.
    pub fn notify_all<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        for event in events {
            self.notify(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.len() + self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("callbacks", &self.callbacks.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::<u32>::new();

        let a = seen.clone();
        observers.register(move |v| a.lock().unwrap().push(("a", *v)));
        let b = seen.clone();
        observers.register(move |v| b.lock().unwrap().push(("b", *v)));

        observers.notify(&1);
        observers.notify(&2);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn test_channel_subscriber_receives_in_order() {
        let mut observers = Observers::<u32>::new();
        let mut rx = observers.subscribe();
        observers.notify_all(&[1, 2, 3]);

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 3);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let mut observers = Observers::<u32>::new();
        let rx = observers.subscribe();
        assert_eq!(observers.len(), 1);
        drop(rx);
        observers.notify(&7);
        assert!(observers.is_empty());
    }
}
