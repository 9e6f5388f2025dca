//! Observer notifications.
//!
//! Buffers and the scheduler never call observers directly. They post an
//! [`Envelope`] through a [`Notifier`], and the host drains the matching
//! [`Dispatcher`] on whichever thread it treats as its UI context. Every
//! callback therefore runs on that one thread, in posting order, and within
//! one event in the order the observers were registered on its source.

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use slab::Slab;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::arena::BufferId;

/// Handle of a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(usize);

/// A notification on its way to observers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    /// Buffer contents changed. `no_data` marks a clear that left nothing to
    /// recompute from.
    BufferUpdated { buffer: BufferId, no_data: bool },
    /// An analysis cycle that wrote to `buffer` has finished.
    AnalysisComplete { buffer: BufferId },
    AnalysisWillUpdate { timestamp: f64 },
    AnalysisDidUpdate { timestamp: f64 },
    /// A cycle was due but its fill requirement was not met.
    AnalysisSkipped,
}

/// Receives notifications on the dispatching thread. All methods default to
/// doing nothing.
#[allow(unused_variables)]
pub trait Observer: Send {
    fn buffer_updated(&mut self, buffer: BufferId, no_data: bool) {}

    fn analysis_complete(&mut self, buffer: BufferId) {}

    fn analysis_will_update(&mut self, timestamp: f64) {}

    fn analysis_did_update(&mut self, timestamp: f64) {}

    fn analysis_skipped(&mut self) {}
}

pub type SharedObserver = Arc<Mutex<dyn Observer>>;

type Registry = Arc<Mutex<Slab<SharedObserver>>>;

#[derive(Debug, Clone)]
pub struct Envelope {
    pub observers: Vec<ObserverId>,
    pub event: Event,
}

/// Producer side of the notification channel.
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Envelope>,
    registry: Registry,
}

impl Notifier {
    pub fn register<O: Observer + 'static>(&self, observer: Arc<Mutex<O>>) -> ObserverId {
        let observer: SharedObserver = observer;
        ObserverId(self.registry.lock().insert(observer))
    }

    /// Forgets an observer. Envelopes already queued for it are dropped at
    /// delivery time.
    pub fn unregister(&self, id: ObserverId) -> bool {
        self.registry.lock().try_remove(id.0).is_some()
    }

    pub fn send(&self, observers: Vec<ObserverId>, event: Event) {
        if observers.is_empty() {
            return;
        }
        if self.tx.send(Envelope { observers, event }).is_err() {
            warn!("Notification channel closed; dropping {:?}", event);
        }
    }
}

/// Consumer side of the notification channel, drained by the host.
///
/// The channel is unbounded. Observers only hear about events the host has
/// dispatched, and that includes the scheduler's own watch on its input
/// buffers, so a host that stops draining also stops the analysis.
pub struct Dispatcher {
    rx: Receiver<Envelope>,
    notifier: Notifier,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            rx,
            notifier: Notifier {
                tx,
                registry: Arc::new(Mutex::new(Slab::new())),
            },
        }
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn register<O: Observer + 'static>(&self, observer: Arc<Mutex<O>>) -> ObserverId {
        self.notifier.register(observer)
    }

    pub fn unregister(&self, id: ObserverId) -> bool {
        self.notifier.unregister(id)
    }

    /// Delivers everything queued so far without blocking. Returns the number
    /// of envelopes handled.
    pub fn dispatch_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    self.deliver(envelope);
                    handled += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return handled,
            }
        }
    }

    /// Waits up to `timeout` for an envelope, then drains the queue.
    pub fn dispatch_timeout(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(envelope) => {
                self.deliver(envelope);
                1 + self.dispatch_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Async variant for hosts that run their UI turn on an executor.
    pub async fn dispatch_next(&self) -> usize {
        match self.rx.recv_async().await {
            Ok(envelope) => {
                self.deliver(envelope);
                1 + self.dispatch_pending()
            }
            Err(_) => 0,
        }
    }

    fn deliver(&self, envelope: Envelope) {
        for id in envelope.observers {
            // Clone out of the registry so callbacks may register or
            // unregister observers.
            let observer = match self.notifier.registry.lock().get(id.0) {
                Some(observer) => Arc::clone(observer),
                None => continue,
            };
            let event = envelope.event;
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let mut observer = observer.lock();
                match event {
                    Event::BufferUpdated { buffer, no_data } => {
                        observer.buffer_updated(buffer, no_data)
                    }
                    Event::AnalysisComplete { buffer } => observer.analysis_complete(buffer),
                    Event::AnalysisWillUpdate { timestamp } => {
                        observer.analysis_will_update(timestamp)
                    }
                    Event::AnalysisDidUpdate { timestamp } => {
                        observer.analysis_did_update(timestamp)
                    }
                    Event::AnalysisSkipped => observer.analysis_skipped(),
                }
            }));
            if result.is_err() {
                error!("Observer {:?} panicked while handling {:?}", id, event);
            }
        }
    }
}
