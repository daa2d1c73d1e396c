use std::{error::Error, sync::Arc};

use parking_lot::Mutex;

/// Error returned by a handler, which aborts the rest of its dispatch pass
pub type HandlerError = Box<dyn Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// A shared callback. Handlers are identified by the `Arc` allocation, so keep
/// a clone of the one you added if you want to remove it later.
pub type Handler<S, T> = Arc<dyn Fn(&S, &T) -> HandlerResult + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler<S, T, F>(f: F) -> Handler<S, T>
where
    F: Fn(&S, &T) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Pending<S, T> {
    added: Vec<Handler<S, T>>,
    removed: Vec<Handler<S, T>>,
}

/// Push `handler` unless the same allocation is already present
fn insert_unique<S, T>(set: &mut Vec<Handler<S, T>>, handler: Handler<S, T>) {
    if !set.iter().any(|h| Arc::ptr_eq(h, &handler)) {
        set.push(handler);
    }
}

/// Thread-safe set of handlers that can be changed while it is being run
///
/// [`HandlerSet::add`] and [`HandlerSet::remove`] only record the change. Each
/// [`HandlerSet::dispatch`] first applies every recorded addition, then every
/// recorded removal, and runs the resulting set on a snapshot. A handler may
/// therefore add or remove handlers (including itself) while running: the change
/// shows up on the next dispatch, never in the middle of the current one.
pub struct HandlerSet<S, T> {
    pending: Mutex<Pending<S, T>>,
    active: Mutex<Vec<Handler<S, T>>>,
}

impl<S, T> Default for HandlerSet<S, T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(Pending {
                added: Vec::new(),
                removed: Vec::new(),
            }),
            active: Mutex::new(Vec::new()),
        }
    }
}

impl<S, T> HandlerSet<S, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler from the next dispatch on. Adding twice is a no-op.
    pub fn add(&self, handler: Handler<S, T>) {
        insert_unique(&mut self.pending.lock().added, handler);
    }

    /// Stop running a handler from the next dispatch on. Unknown handlers are
    /// ignored.
    pub fn remove(&self, handler: &Handler<S, T>) {
        insert_unique(&mut self.pending.lock().removed, handler.clone());
    }

    /// Apply pending changes, then call every active handler once
    ///
    /// The order handlers run in is unspecified. The first handler error stops
    /// the pass and is returned; handlers that had not run yet are skipped.
    pub fn dispatch(&self, source: &S, args: &T) -> HandlerResult {
        let snapshot = {
            let mut pending = self.pending.lock();
            let mut active = self.active.lock();
            for handler in pending.added.drain(..) {
                insert_unique(&mut active, handler);
            }
            for handler in pending.removed.drain(..) {
                active.retain(|h| !Arc::ptr_eq(h, &handler));
            }
            active.clone()
        };
        for handler in snapshot {
            handler(source, args)?;
        }
        Ok(())
    }

    /// Number of active handlers as of the last dispatch
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
