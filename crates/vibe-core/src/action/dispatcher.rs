//! Multicast dispatcher
//!
//! Ordered set of actions fired together, with optional once and memory
//! behavior. Actions always run with no internal lock held, so an action
//! may add, remove or fire on the dispatcher that invoked it.

use crate::error::Error;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A callback invoked with one dispatched value
pub type Action<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Receives failures of actions that panicked during a fire
pub type FailureHook = Arc<dyn Fn(Error) + Send + Sync>;

/// Wrap a closure as an [`Action`]
pub fn action<T, F>(f: F) -> Action<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Dispatcher behavior flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Fire at most once, dropping every action afterwards
    pub once: bool,
    /// Remember the last fired value and replay it to late actions
    pub memory: bool,
}

impl DispatcherOptions {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            once: false,
            memory: false,
        }
    }

    #[must_use]
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    #[must_use]
    pub const fn memory(mut self) -> Self {
        self.memory = true;
        self
    }
}

struct Inner<T> {
    actions: Vec<Action<T>>,
    memory: Option<T>,
    fired: bool,
    disabled: bool,
}

/// Multicast callback registry
pub struct Dispatcher<T> {
    name: String,
    options: DispatcherOptions,
    inner: Mutex<Inner<T>>,
    failure_hook: Option<FailureHook>,
}

impl<T: Clone> Dispatcher<T> {
    /// Create a dispatcher; `name` labels failure reports
    pub fn new(name: impl Into<String>, options: DispatcherOptions) -> Self {
        Self {
            name: name.into(),
            options,
            inner: Mutex::new(Inner {
                actions: Vec::new(),
                memory: None,
                fired: false,
                disabled: false,
            }),
            failure_hook: None,
        }
    }

    /// Route panicking actions to `hook` in addition to the log
    #[must_use]
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.failure_hook = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> DispatcherOptions {
        self.options
    }

    /// Register an action
    ///
    /// With `memory`, a previously fired value is replayed to the new action
    /// before this call returns. Adding an action that is already registered
    /// does nothing.
    pub fn add(&self, action: Action<T>) {
        let replay = {
            let mut inner = self.inner.lock();
            if inner.disabled {
                return;
            }

            if self.options.once && inner.fired {
                // Exhausted: the action is never stored, only replayed.
                inner.memory.clone()
            } else if inner.actions.iter().any(|a| Arc::ptr_eq(a, &action)) {
                None
            } else {
                inner.actions.push(action.clone());
                inner.memory.clone()
            }
        };

        if let Some(value) = replay {
            self.invoke(&action, &value);
        }
    }

    /// Unregister an action, matched by identity
    pub fn remove(&self, action: &Action<T>) {
        self.inner
            .lock()
            .actions
            .retain(|registered| !Arc::ptr_eq(registered, action));
    }

    /// Invoke every registered action in registration order
    pub fn fire(&self, value: T) {
        let actions = {
            let mut inner = self.inner.lock();
            if inner.disabled || (self.options.once && inner.fired) {
                return;
            }

            inner.fired = true;
            if self.options.memory {
                inner.memory = Some(value.clone());
            }

            if self.options.once {
                std::mem::take(&mut inner.actions)
            } else {
                inner.actions.clone()
            }
        };

        for action in &actions {
            self.invoke(action, &value);
        }
    }

    /// Drop every action and remembered value; permanent
    pub fn disable(&self) {
        let mut inner = self.inner.lock();
        inner.disabled = true;
        inner.actions.clear();
        inner.memory = None;
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.lock().disabled
    }

    /// Whether `fire` has run at least once
    pub fn has_fired(&self) -> bool {
        self.inner.lock().fired
    }

    /// Number of registered actions
    pub fn len(&self) -> usize {
        self.inner.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn invoke(&self, action: &Action<T>, value: &T) {
        if let Err(err) = guarded(&self.name, || action(value)) {
            if let Some(hook) = &self.failure_hook {
                hook(err);
            }
        }
    }
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("actions", &inner.actions.len())
            .field("fired", &inner.fired)
            .field("disabled", &inner.disabled)
            .finish()
    }
}

/// Run a callback, converting a panic into a logged `CallbackFailure`
pub(crate) fn guarded<R, F: FnOnce() -> R>(label: &str, f: F) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        tracing::error!(dispatcher = %label, error = %message, "Action panicked");
        Error::CallbackFailure {
            dispatcher: label.to_string(),
            message,
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
