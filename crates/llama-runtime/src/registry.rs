//! Keyed singleflight cache of loaded models.
//!
//! At most one load runs per key. Callers that arrive while a load is in flight
//! register their progress sink and block until it completes; callers that
//! arrive afterwards get the cached model. A failed load is evicted so the next
//! [`ModelRegistry::acquire`] starts over.
//!
//! Lock order is registry map, then entry. Loads run with no lock held.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use llama_engine::{LlamaError, ModelLoader, Resource};
use parking_lot::{Condvar, Mutex, Once};
use tracing::{debug, error, info, warn, Span};

use crate::error::{Result, RuntimeError};
use crate::progress::ProgressThrottle;

/// Receives load progress in `[0, 1]`.
pub type ProgressSink = Arc<dyn Fn(f32) + Send + Sync>;

enum Slot<M> {
    Loading,
    Ready(Arc<M>),
    Failed(LlamaError),
    /// Torn down by shutdown.
    Freed,
}

struct EntryState<M> {
    slot: Slot<M>,
    waiters: Vec<ProgressSink>,
    throttle: ProgressThrottle,
}

struct Entry<M> {
    state: Mutex<EntryState<M>>,
    done: Condvar,
}

impl<M> Entry<M> {
    fn loading(first: Option<ProgressSink>) -> Self {
        Self {
            state: Mutex::new(EntryState {
                slot: Slot::Loading,
                waiters: first.into_iter().collect(),
                throttle: ProgressThrottle::new(),
            }),
            done: Condvar::new(),
        }
    }

    /// Fan a progress value out to every waiter registered so far.
    fn broadcast(&self, progress: f32) {
        let sinks = {
            let mut state = self.state.lock();
            if !state.throttle.admit(progress) {
                return;
            }
            state.waiters.clone()
        };
        for sink in &sinks {
            sink(progress);
        }
    }
}

struct Inner<M> {
    closed: bool,
    entries: HashMap<String, Arc<Entry<M>>>,
}

/// Singleflight-with-cache registry over a [`ModelLoader`].
pub struct ModelRegistry<L: ModelLoader> {
    loader: L,
    inner: Mutex<Inner<L::Model>>,
    shutdown: Once,
    span: Span,
}

impl<L: ModelLoader> ModelRegistry<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            inner: Mutex::new(Inner {
                closed: false,
                entries: HashMap::new(),
            }),
            shutdown: Once::new(),
            span: tracing::info_span!("model_registry"),
        }
    }

    /// Emit this registry's events under `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Get the model for `key`, loading it if nobody has yet.
    ///
    /// Blocks while a load for `key` is in flight. `progress` is only called if
    /// this caller ends up waiting on (or running) a load.
    pub fn acquire(&self, key: &str, progress: Option<ProgressSink>) -> Result<Arc<L::Model>> {
        loop {
            let (entry, owner) = {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return Err(RuntimeError::RegistryClosed);
                }

                match inner.entries.get(key).cloned() {
                    Some(entry) => {
                        let mut state = entry.state.lock();
                        match &state.slot {
                            Slot::Ready(model) => return Ok(Arc::clone(model)),
                            Slot::Freed => return Err(RuntimeError::RegistryClosed),
                            Slot::Failed(err) => {
                                debug!(parent: &self.span, key, error = %err, "evicting failed entry, retrying load");
                                drop(state);
                                inner.entries.remove(key);
                                continue;
                            }
                            Slot::Loading => {
                                if let Some(sink) = progress.clone() {
                                    state.waiters.push(sink);
                                }
                            }
                        }
                        drop(state);
                        (entry, false)
                    }
                    None => {
                        let entry = Arc::new(Entry::loading(progress.clone()));
                        inner.entries.insert(key.to_string(), Arc::clone(&entry));
                        (entry, true)
                    }
                }
            };

            return if owner {
                self.construct(key, entry)
            } else {
                debug!(parent: &self.span, key, "waiting on in-flight load");
                Self::wait(&entry)
            };
        }
    }

    fn construct(&self, key: &str, entry: Arc<Entry<L::Model>>) -> Result<Arc<L::Model>> {
        info!(parent: &self.span, key, "loading model");
        // A panicking loader or progress sink must still settle the entry, or
        // waiters and shutdown would block on it forever.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.loader.load(key, &mut |p: f32| entry.broadcast(p))
        }))
        .unwrap_or_else(|_| {
            error!(parent: &self.span, key, "model load panicked");
            Err(LlamaError::ModelLoad(format!("load of {key} panicked")))
        });

        let outcome = {
            let mut state = entry.state.lock();
            state.waiters.clear();
            match result {
                Ok(model) => {
                    let model = Arc::new(model);
                    state.slot = Slot::Ready(Arc::clone(&model));
                    Ok(model)
                }
                Err(err) => {
                    state.slot = Slot::Failed(err.clone());
                    Err(err)
                }
            }
        };
        entry.done.notify_all();

        match outcome {
            Ok(model) => {
                info!(parent: &self.span, key, "model loaded");
                Ok(model)
            }
            Err(err) => {
                warn!(parent: &self.span, key, error = %err, "model load failed");
                let mut inner = self.inner.lock();
                if inner
                    .entries
                    .get(key)
                    .is_some_and(|current| Arc::ptr_eq(current, &entry))
                {
                    inner.entries.remove(key);
                }
                Err(RuntimeError::Engine(err))
            }
        }
    }

    fn wait(entry: &Entry<L::Model>) -> Result<Arc<L::Model>> {
        let mut state = entry.state.lock();
        while matches!(state.slot, Slot::Loading) {
            entry.done.wait(&mut state);
        }
        match &state.slot {
            Slot::Ready(model) => Ok(Arc::clone(model)),
            Slot::Failed(err) => Err(RuntimeError::Engine(err.clone())),
            Slot::Freed | Slot::Loading => Err(RuntimeError::RegistryClosed),
        }
    }

    /// Non-blocking peek at `key`.
    ///
    /// `Ok(None)` means a load is still in flight.
    pub fn lookup(&self, key: &str) -> Result<Option<Arc<L::Model>>> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(RuntimeError::RegistryClosed);
        }
        let entry = inner
            .entries
            .get(key)
            .ok_or_else(|| RuntimeError::NotFound(key.to_string()))?;
        let state = entry.state.lock();
        match &state.slot {
            Slot::Loading => Ok(None),
            Slot::Ready(model) => Ok(Some(Arc::clone(model))),
            Slot::Failed(err) => Err(RuntimeError::Engine(err.clone())),
            Slot::Freed => Err(RuntimeError::RegistryClosed),
        }
    }

    /// Number of mapped entries, in flight or loaded.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Number of entries holding a ready model.
    pub fn loaded(&self) -> usize {
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| matches!(entry.state.lock().slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Stop admitting loads, wait out in-flight ones and destroy every cached model.
    ///
    /// Safe to call any number of times from any thread. Concurrent callers
    /// block until the single teardown pass finishes.
    pub fn shutdown(&self) {
        self.shutdown.call_once(|| self.teardown());
    }

    fn teardown(&self) {
        let entries = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };
        info!(parent: &self.span, entries = entries.len(), "shutting down model registry");

        for (key, entry) in entries {
            let mut state = entry.state.lock();
            while matches!(state.slot, Slot::Loading) {
                debug!(parent: &self.span, key = %key, "waiting for load before teardown");
                entry.done.wait(&mut state);
            }
            if let Slot::Ready(model) = &state.slot {
                if let Some(destroy) = model.as_destroy() {
                    match destroy.destroy() {
                        Ok(()) => debug!(parent: &self.span, key = %key, "model destroyed"),
                        Err(err) => {
                            error!(parent: &self.span, key = %key, error = %err, "failed to destroy model")
                        }
                    }
                }
            }
            state.slot = Slot::Freed;
            state.waiters.clear();
            drop(state);
            entry.done.notify_all();
        }
        info!(parent: &self.span, "model registry shut down");
    }
}

impl<L: ModelLoader> fmt::Debug for ModelRegistry<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ModelRegistry")
            .field("closed", &inner.closed)
            .field("entries", &inner.entries.len())
            .finish()
    }
}
