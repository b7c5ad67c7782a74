//! Last-value-cached observable containers
//!
//! An [`Observable`] holds the most recent value behind an `Arc` and a list of
//! subscriber callbacks. Subscribing yields a [`Subscription`] handle; the
//! callback stays registered until the handle is dropped or unsubscribed.
//! Callbacks run outside the internal lock, in subscription order.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

/// Type alias for subscriber callbacks
pub type Callback<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

struct Inner<T> {
    value: Option<Arc<T>>,
    subscribers: Vec<(u64, Callback<T>)>,
    next_id: u64,
}

/// Multi-subscriber container of the latest value
pub struct Observable<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T: Send + Sync + 'static> Observable<T> {
    /// Creates an observable with no value yet
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                value: None,
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Creates an observable already holding `value`
    pub fn with_value(value: T) -> Self {
        let observable = Self::new();
        if let Ok(mut inner) = observable.inner.lock() {
            inner.value = Some(Arc::new(value));
        }
        observable
    }

    /// The current value, if one has been published
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.lock().ok().and_then(|inner| inner.value.clone())
    }

    /// Registers `callback`; it receives the current value immediately (if
    /// any) and every later publication
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let callback: Callback<T> = Arc::new(callback);
        let (id, current) = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.subscribers.push((id, callback.clone()));
                (id, inner.value.clone())
            }
            Err(_) => return Subscription::detached(),
        };

        if let Some(value) = current {
            callback(value);
        }

        let weak: Weak<Mutex<Inner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Ok(mut inner) = inner.lock() {
                        inner.subscribers.retain(|(sid, _)| *sid != id);
                    }
                }
            })),
        }
    }

    /// Replaces the held value and notifies every subscriber
    pub fn publish(&self, value: T) {
        self.publish_arc(Arc::new(value));
    }

    /// Like [`publish`](Self::publish) for an already shared value
    pub fn publish_arc(&self, value: Arc<T>) {
        let subscribers: Vec<Callback<T>> = match self.inner.lock() {
            Ok(mut inner) => {
                inner.value = Some(value.clone());
                inner.subscribers.iter().map(|(_, cb)| cb.clone()).collect()
            }
            Err(_) => return,
        };

        for callback in subscribers {
            callback(value.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.subscribers.len())
            .unwrap_or(0)
    }
}

impl<T: Send + Sync + 'static> Default for Observable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.inner.lock().map(|i| i.subscribers.len()).unwrap_or(0);
        f.debug_struct("Observable")
            .field("subscribers", &subscribers)
            .finish()
    }
}

/// Keeps a callback registered; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn detached() -> Self {
        Self { remove: None }
    }

    /// Explicitly ends the subscription
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(Arc<T>) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |v: Arc<T>| sink.lock().unwrap().push((*v).clone()))
    }

    #[test]
    fn test_subscribe_receives_current_then_updates() {
        let observable = Observable::with_value(1);
        let (seen, callback) = recorder::<i32>();
        let _sub = observable.subscribe(callback);

        observable.publish(2);
        observable.publish(3);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(observable.get().map(|v| *v), Some(3));
    }

    #[test]
    fn test_no_initial_delivery_without_value() {
        let observable = Observable::<i32>::new();
        let (seen, callback) = recorder::<i32>();
        let _sub = observable.subscribe(callback);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_and_unsubscribe_stop_delivery() {
        let observable = Observable::new();
        let (first, cb1) = recorder::<&'static str>();
        let (second, cb2) = recorder::<&'static str>();
        let sub1 = observable.subscribe(cb1);
        let sub2 = observable.subscribe(cb2);
        assert_eq!(observable.subscriber_count(), 2);

        observable.publish("a");
        drop(sub1);
        observable.publish("b");
        sub2.unsubscribe();
        observable.publish("c");

        assert_eq!(*first.lock().unwrap(), vec!["a"]);
        assert_eq!(*second.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(observable.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_notified_in_order() {
        let observable = Observable::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<_> = (0..3)
            .map(|i| {
                let order = order.clone();
                observable.subscribe(move |_: Arc<()>| order.lock().unwrap().push(i))
            })
            .collect();

        observable.publish(());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_callback_may_unsubscribe_others_without_deadlock() {
        let observable = Observable::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot_in_cb = slot.clone();
        let _killer = observable.subscribe(move |_: Arc<u8>| {
            slot_in_cb.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(observable.subscribe(|_: Arc<u8>| {}));

        observable.publish(1);
        assert_eq!(observable.subscriber_count(), 1);
    }
}
