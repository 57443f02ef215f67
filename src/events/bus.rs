use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use uuid::Uuid;

use super::event::{Event, EventKind};

/// Outcome of one handler invocation. Errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Clone)]
struct Listener {
    id: Uuid,
    predicate: Predicate,
    handler: Handler,
}

type Table = Arc<Mutex<HashMap<EventKind, Vec<Listener>>>>;

#[derive(Clone, Default)]
pub struct EventBus {
    watchers: Table,
    triggers: Table,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent handler for `kind`.
    pub fn watch<F, Fut>(&self, kind: EventKind, handler: F) -> Uuid
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.watch_when(kind, |_| true, handler)
    }

    /// Register a persistent handler that only runs when `predicate` passes.
    pub fn watch_when<P, F, Fut>(&self, kind: EventKind, predicate: P, handler: F) -> Uuid
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        insert(&self.watchers, kind, listener(predicate, handler))
    }

    /// Register a one-shot handler for `kind`.
    pub fn trigger<F, Fut>(&self, kind: EventKind, handler: F) -> Uuid
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.trigger_when(kind, |_| true, handler)
    }

    /// Register a one-shot handler, discarded after the first run whose
    /// event passes `predicate`.
    pub fn trigger_when<P, F, Fut>(&self, kind: EventKind, predicate: P, handler: F) -> Uuid
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        insert(&self.triggers, kind, listener(predicate, handler))
    }

    /// Remove a watcher or trigger. Returns whether anything was removed.
    pub fn remove(&self, id: Uuid) -> bool {
        remove_from(&self.watchers, id) || remove_from(&self.triggers, id)
    }

    /// Number of watchers and triggers registered for `kind`.
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        count(&self.watchers, kind) + count(&self.triggers, kind)
    }

    /// Publish `event` under its kind.
    ///
    /// Every passing watcher runs to completion before any trigger runs.
    /// Passing triggers are unregistered before they run.
    pub async fn run(&self, event: Event) {
        let watchers: Vec<Listener> = match self.watchers.lock() {
            Ok(table) => table
                .get(&event.kind)
                .map(|listeners| {
                    listeners
                        .iter()
                        .filter(|l| (l.predicate)(&event))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => {
                log::error!("Event bus lock poisoned: {e}");
                return;
            }
        };

        for watcher in watchers {
            invoke(&watcher, event.clone()).await;
        }

        let fired: Vec<Listener> = match self.triggers.lock() {
            Ok(mut table) => match table.get_mut(&event.kind) {
                Some(listeners) => {
                    let (fired, kept): (Vec<Listener>, Vec<Listener>) = listeners
                        .drain(..)
                        .partition(|l| (l.predicate)(&event));
                    *listeners = kept;
                    fired
                }
                None => Vec::new(),
            },
            Err(e) => {
                log::error!("Event bus lock poisoned: {e}");
                return;
            }
        };

        for trigger in fired {
            invoke(&trigger, event.clone()).await;
        }
    }
}

fn listener<P, F, Fut>(predicate: P, handler: F) -> Listener
where
    P: Fn(&Event) -> bool + Send + Sync + 'static,
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Listener {
        id: Uuid::new_v4(),
        predicate: Arc::new(predicate),
        handler: Arc::new(move |event| -> BoxFuture<'static, HandlerResult> {
            Box::pin(handler(event))
        }),
    }
}

fn insert(table: &Table, kind: EventKind, listener: Listener) -> Uuid {
    let id = listener.id;
    if let Ok(mut table) = table.lock() {
        table.entry(kind).or_default().push(listener);
    }
    id
}

fn remove_from(table: &Table, id: Uuid) -> bool {
    let mut table = match table.lock() {
        Ok(table) => table,
        Err(_) => return false,
    };
    for listeners in table.values_mut() {
        if let Some(index) = listeners.iter().position(|l| l.id == id) {
            listeners.remove(index);
            return true;
        }
    }
    false
}

fn count(table: &Table, kind: &EventKind) -> usize {
    table
        .lock()
        .map(|table| table.get(kind).map_or(0, Vec::len))
        .unwrap_or(0)
}

async fn invoke(listener: &Listener, event: Event) {
    let kind = event.kind.clone();
    match AssertUnwindSafe((listener.handler)(event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Handler {} for {:?} failed: {}", listener.id, kind, e),
        Err(_) => log::error!("Handler {} for {:?} panicked", listener.id, kind),
    }
}
