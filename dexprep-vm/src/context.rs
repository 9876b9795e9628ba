//! The explicit context handle threaded through every top-level entry
//! point: policy configuration fixed at boot, the loaded-classes table
//! behind one coarse lock, and the per-class initialization synchronizers
//! used while a live VM (rather than a cold cache build) links classes
//! concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};

use dexprep_types::ClassHandle;

use crate::link::Class;

/// Policy knobs deliberately left external to the core (caching policy is
/// the caller's decision) plus the flag word the cache-build subprocess
/// command line passes in.
#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub verify_enabled: bool,
    pub verify_all: bool,
    pub optimize_enabled: bool,
    pub optimize_all: bool,
    pub bootstrap: bool,
    pub generate_register_maps: bool,
    pub vm_build_number: u32,
    pub boot_classpath: Vec<String>,
}

impl PrepareConfig {
    /// Decodes the cache-build subprocess flag word: bits 0-5 are
    /// verify-enabled, verify-all, optimize-enabled, optimize-all,
    /// bootstrap, generate-register-maps, in that order.
    pub fn from_flag_word(flags: u32, vm_build_number: u32, boot_classpath: Vec<String>) -> Self {
        PrepareConfig {
            verify_enabled: flags & 0x1 != 0,
            verify_all: flags & 0x2 != 0,
            optimize_enabled: flags & 0x4 != 0,
            optimize_all: flags & 0x8 != 0,
            bootstrap: flags & 0x10 != 0,
            generate_register_maps: flags & 0x20 != 0,
            vm_build_number,
            boot_classpath,
        }
    }
}

impl Default for PrepareConfig {
    fn default() -> Self {
        PrepareConfig {
            verify_enabled: true,
            verify_all: false,
            optimize_enabled: true,
            optimize_all: false,
            bootstrap: false,
            generate_register_maps: false,
            vm_build_number: 0,
            boot_classpath: Vec::new(),
        }
    }
}

/// The process-wide loaded-classes table, guarded by one reader/writer
/// lock — an `RwLock` rather than a plain `Mutex` since lookups vastly
/// outnumber insertions.
#[derive(Debug, Default)]
pub struct LoadedClasses {
    classes: RwLock<Vec<Class>>,
}

impl LoadedClasses {
    /// Creates an empty table.
    pub fn new() -> Self {
        LoadedClasses {
            classes: RwLock::new(Vec::new()),
        }
    }

    /// Inserts a freshly loaded class, returning its stable handle.
    pub fn insert(&self, class: Class) -> ClassHandle {
        let mut guard = self.classes.write().expect("loaded-classes lock poisoned");
        let handle = ClassHandle::new(guard.len() as u32);
        guard.push(class);
        handle
    }

    /// Returns a clone of the class record at `handle`.
    ///
    /// Cloning rather than returning a guard keeps callers from holding the
    /// table-wide lock across linker/verifier work that may itself need to
    /// resolve other classes; every mutation instead goes through
    /// [`LoadedClasses::replace`].
    pub fn get(&self, handle: ClassHandle) -> Option<Class> {
        self.classes
            .read()
            .expect("loaded-classes lock poisoned")
            .get(handle.index())
            .cloned()
    }

    /// Replaces the class record at `handle` wholesale (used after linking
    /// mutates vtable/iftable/fields, or a state transition).
    pub fn replace(&self, handle: ClassHandle, class: Class) {
        let mut guard = self.classes.write().expect("loaded-classes lock poisoned");
        if let Some(slot) = guard.get_mut(handle.index()) {
            *slot = class;
        }
    }

    /// Finds a class by its fully-qualified internal descriptor.
    pub fn find_by_name(&self, name: &str) -> Option<ClassHandle> {
        self.classes
            .read()
            .expect("loaded-classes lock poisoned")
            .iter()
            .position(|c| c.name == name)
            .map(|i| ClassHandle::new(i as u32))
    }

    /// Number of classes currently loaded.
    pub fn len(&self) -> usize {
        self.classes.read().expect("loaded-classes lock poisoned").len()
    }

    /// True if no classes are loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mirrors the `Class` state machine for the purpose of the class-init
/// monitor; kept separate from [`Class::state`] because waiters block on
/// this one's condvar, not on the table lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassInitState {
    Uninitialized,
    Initializing { owner_thread: std::thread::ThreadId },
    Initialized,
    Error,
}

/// Per-class initialization synchronizer, standing in for a per-object
/// monitor with an explicit `(Mutex, Condvar)` pair.
#[derive(Debug)]
pub struct ClassInitSync {
    state: Mutex<ClassInitState>,
    condvar: Condvar,
}

impl ClassInitSync {
    fn new() -> Self {
        ClassInitSync {
            state: Mutex::new(ClassInitState::Uninitialized),
            condvar: Condvar::new(),
        }
    }

    /// Attempts to become the initializing thread for this class; returns
    /// `true` if this call won the race.
    pub fn try_begin_initializing(&self) -> bool {
        let mut guard = self.state.lock().expect("class-init lock poisoned");
        if *guard == ClassInitState::Uninitialized {
            *guard = ClassInitState::Initializing {
                owner_thread: std::thread::current().id(),
            };
            true
        } else {
            false
        }
    }

    /// Marks initialization complete and wakes all waiters.
    pub fn finish(&self, state: ClassInitState) {
        let mut guard = self.state.lock().expect("class-init lock poisoned");
        *guard = state;
        self.condvar.notify_all();
    }

    /// Blocks until this class leaves `Initializing`, with no timeout and
    /// no interruptibility: class-init failures are permanent and must be
    /// globally consistent.
    pub fn wait_for_initialization(&self) -> ClassInitState {
        let guard = self.state.lock().expect("class-init lock poisoned");
        let guard = self
            .condvar
            .wait_while(guard, |s| matches!(s, ClassInitState::Initializing { .. }))
            .expect("class-init lock poisoned");
        *guard
    }

    /// Current state, without blocking.
    pub fn current(&self) -> ClassInitState {
        *self.state.lock().expect("class-init lock poisoned")
    }
}

/// The explicit context handle passed to every top-level pipeline entry
/// point, replacing the source's global mutable `gDvm` root.
#[derive(Debug)]
pub struct PrepareContext {
    pub config: PrepareConfig,
    pub classes: LoadedClasses,
    init_syncs: Mutex<HashMap<ClassHandle, Arc<ClassInitSync>>>,
}

impl PrepareContext {
    /// Creates a fresh context with an empty loaded-classes table.
    pub fn new(config: PrepareConfig) -> Self {
        PrepareContext {
            config,
            classes: LoadedClasses::new(),
            init_syncs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns (creating if necessary) the initialization synchronizer for
    /// `handle`.
    pub fn init_sync(&self, handle: ClassHandle) -> Arc<ClassInitSync> {
        let mut guard = self.init_syncs.lock().expect("init-sync map lock poisoned");
        guard
            .entry(handle)
            .or_insert_with(|| Arc::new(ClassInitSync::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::ClassState;

    fn test_class(name: &str) -> Class {
        Class::new_root(name.to_string())
    }

    #[test]
    fn insert_and_get_round_trip() {
        let table = LoadedClasses::new();
        let handle = table.insert(test_class("java/lang/Object"));
        let got = table.get(handle).unwrap();
        assert_eq!(got.name, "java/lang/Object");
    }

    #[test]
    fn find_by_name_locates_inserted_class() {
        let table = LoadedClasses::new();
        let handle = table.insert(test_class("Foo"));
        assert_eq!(table.find_by_name("Foo"), Some(handle));
        assert_eq!(table.find_by_name("Bar"), None);
    }

    #[test]
    fn flag_word_decodes_each_bit() {
        let config = PrepareConfig::from_flag_word(0b10_1010, 3, Vec::new());
        assert!(!config.verify_enabled);
        assert!(config.verify_all);
        assert!(!config.optimize_enabled);
        assert!(config.optimize_all);
        assert!(!config.bootstrap);
        assert!(config.generate_register_maps);
    }

    #[test]
    fn class_init_sync_only_lets_one_thread_win() {
        let sync = ClassInitSync::new();
        assert!(sync.try_begin_initializing());
        assert!(!sync.try_begin_initializing());
        sync.finish(ClassInitState::Initialized);
        assert_eq!(sync.current(), ClassInitState::Initialized);
    }

    #[test]
    fn replace_overwrites_slot() {
        let table = LoadedClasses::new();
        let handle = table.insert(test_class("Foo"));
        let mut updated = table.get(handle).unwrap();
        updated.state = ClassState::Resolved;
        table.replace(handle, updated);
        assert_eq!(table.get(handle).unwrap().state, ClassState::Resolved);
    }
}
