//! Handles, the context registry and single-owner execution
//!
//! Each [`Handle`] names one [`Context`] stored in a [`Registry`]. Any number
//! of handles may exist, but only one of them drives a control unit at a
//! time: `run` and `invoke` take the registry's ownership slot, blocking on a
//! condition variable while another handle holds it.

use super::context::Context;
use super::control::{ControlUnit, Status};
use super::flags::FlagSet;
use super::memory::MemorySpace;
use super::EngineError;
use crate::logging::{log, LogCategory, LogLevel};
use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

/// Behaviour switches fixed when a handle is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct HandleSettings(u8);

impl HandleSettings {
    pub const NONE: Self = Self(0);
    /// Decode and render only; never execute
    pub const DISASSEMBLE: Self = Self(1 << 0);
    /// Suppress instruction pointer changes from control flow
    pub const NOJMP: Self = Self(1 << 1);
    /// Ignore breakpoints
    pub const NOBREAK: Self = Self(1 << 2);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for HandleSettings {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Registry-unique handle identifier, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map from handle id to context plus the ownership slot
///
/// Entries are never removed; a registry lives as long as its handles.
pub struct Registry {
    contexts: RwLock<HashMap<HandleId, Arc<Mutex<Context>>>>,
    owner: Mutex<Option<HandleId>>,
    released: Condvar,
    next_id: AtomicU64,
}

/// Ownership of the registry's execution slot; released on drop
struct Lease<'a> {
    registry: &'a Registry,
    id: HandleId,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        *lock(&self.registry.owner) = None;
        self.registry.released.notify_all();
        log(LogCategory::Registry, LogLevel::Trace, || {
            format!("Handle {} released the engine", self.id)
        });
    }
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            contexts: RwLock::new(HashMap::new()),
            owner: Mutex::new(None),
            released: Condvar::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Process-wide registry used by [`Handle::new`]
    pub fn global() -> Arc<Self> {
        static INSTANCE: OnceLock<Arc<Registry>> = OnceLock::new();
        INSTANCE.get_or_init(Registry::new).clone()
    }

    /// Store `context` and return a handle bound to it
    pub fn register(
        self: &Arc<Self>,
        name: &str,
        context: Context,
        settings: HandleSettings,
    ) -> Handle {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(context)));
        log(LogCategory::Registry, LogLevel::Debug, || {
            format!("Registered handle '{}' as {} ({:?})", name, id, settings)
        });
        Handle {
            name: name.to_string(),
            id,
            settings,
            registry: Arc::clone(self),
        }
    }

    /// Handle currently driving the engine, if any
    pub fn owner(&self) -> Option<HandleId> {
        *lock(&self.owner)
    }

    pub fn len(&self) -> usize {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn context(&self, id: HandleId) -> Result<Arc<Mutex<Context>>, EngineError> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(EngineError::UnknownHandle(id))
    }

    /// Block until the slot is free, then take it for `id`
    fn acquire(&self, id: HandleId) -> Lease<'_> {
        let mut owner = lock(&self.owner);
        while let Some(current) = *owner {
            log(LogCategory::Registry, LogLevel::Trace, || {
                format!("Handle {} waiting for {}", id, current)
            });
            owner = self
                .released
                .wait(owner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *owner = Some(id);
        Lease { registry: self, id }
    }
}

/// Owner token for one registered context
#[derive(Clone)]
pub struct Handle {
    name: String,
    id: HandleId,
    settings: HandleSettings,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Handle {
    /// Register `context` in the global registry
    pub fn new(name: &str, context: Context, settings: HandleSettings) -> Self {
        Registry::global().register(name, context, settings)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn settings(&self) -> HandleSettings {
        self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// True while this handle holds the execution slot
    pub fn is_busy(&self) -> bool {
        self.registry.owner() == Some(self.id)
    }

    /// Drive the control unit over this handle's context
    ///
    /// Blocks until no other handle is running, then runs until one
    /// instruction completes (`step`), a breakpoint or the end of code.
    pub fn run(&self, step: bool) -> Result<Status, EngineError> {
        self.invoke(|context| ControlUnit::new(context, self.settings).run(step))
    }

    /// Like [`Handle::run`], but gives up after `limit` instructions
    pub fn run_for(&self, limit: u64) -> Result<Status, EngineError> {
        self.invoke(|context| ControlUnit::new(context, self.settings).run_for(limit))
    }

    /// [`Handle::run`] on a named worker thread
    pub fn run_async(&self, step: bool) -> Result<RunTask, EngineError> {
        let handle = self.clone();
        let worker = thread::Builder::new()
            .name(format!("run-{}", self.name))
            .spawn(move || handle.run(step))?;
        Ok(RunTask {
            name: self.name.clone(),
            worker,
        })
    }

    /// Run `f` against the context while holding the execution slot
    ///
    /// `f` must not call back into `run` or `invoke` on any handle of the
    /// same registry.
    pub fn invoke<R>(&self, f: impl FnOnce(&mut Context) -> R) -> Result<R, EngineError> {
        let cell = self.registry.context(self.id)?;
        let _lease = self.registry.acquire(self.id);
        let mut context = lock(&cell);
        Ok(f(&mut context))
    }

    /// Replace the whole context
    pub fn update_context(&self, context: Context) -> Result<(), EngineError> {
        self.invoke(move |current| *current = context)
    }

    /// Deep copy of the context
    pub fn context(&self) -> Result<Context, EngineError> {
        self.invoke(|context| context.deep_copy())
    }

    pub fn flags(&self) -> Result<FlagSet, EngineError> {
        self.invoke(|context| context.flags)
    }

    pub fn memory(&self) -> Result<MemorySpace, EngineError> {
        self.invoke(|context| context.memory.clone())
    }
}

/// A run executing on a worker thread
pub struct RunTask {
    name: String,
    worker: JoinHandle<Result<Status, EngineError>>,
}

impl RunTask {
    /// Block until the run finishes
    pub fn wait(self) -> Result<Status, EngineError> {
        self.worker
            .join()
            .map_err(|_| EngineError::WorkerPanicked(self.name))?
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}
