//! Process-wide context (component G): plugin loading, process-info
//! exchange, thread-mode lock selection, and the progress list that
//! drives every outstanding request.

use crate::config::{Config, LockKind};
use crate::error::{UcgError, UcgResult};
use crate::plugin::{register_builtin_plugins, PluginRegistry};
use crate::request::{Request, TrackedRequest};
use crate::topology::{Location, ProcessInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tracing::{debug, info};

static LOGGING_INIT: Once = Once::new();

/// Idempotent `tracing_subscriber` init, driven by `Config::log_level`.
/// Safe to call from every `Context::init`; only the first call takes
/// effect.
fn init_logging(log_level: &str) {
    LOGGING_INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_new(log_level)
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// A minimal test-and-test-and-set spinlock backing `LockKind::Spin`.
/// None of this workspace's dependencies offer one (`parking_lot` only
/// ships a mutex), so it is hand-rolled rather than pulled in for a
/// dozen lines of logic.
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: std::cell::UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    fn new(value: T) -> Self {
        SpinLock { locked: AtomicBool::new(false), value: std::cell::UnsafeCell::new(value) }
    }

    fn lock(&self) -> SpinGuard<'_, T> {
        while self.locked.compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed).is_err() {
            while self.locked.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }
        SpinGuard { lock: self }
    }
}

struct SpinGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<'a, T> std::ops::Deref for SpinGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T> std::ops::DerefMut for SpinGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T> Drop for SpinGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// The two lock implementations `USE_MT_MUTEX` can select between,
/// both guarding the same `ContextState` (`spec.md` §4.G step 5).
///
/// Held behind an `Arc` on `Context` so a [`TrackedRequest`] can keep
/// its own clone and push/remove itself on the same list `progress()`
/// sweeps, without borrowing `Context` itself.
pub(crate) enum Lock {
    Mutex(parking_lot::Mutex<ContextState>),
    Spin(SpinLock<ContextState>),
}

impl Lock {
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        match self {
            Lock::Mutex(m) => f(&mut m.lock()),
            Lock::Spin(s) => f(&mut s.lock()),
        }
    }
}

/// Everything the context lock protects: the progress list and the
/// request-id allocator groups borrow from.
///
/// Each list entry is the same `Arc<Mutex<Request>>` backing a
/// [`TrackedRequest`] handle held by whichever caller started it, so
/// `progress_once` and that caller's own `TrackedRequest::test` race to
/// drive the same request rather than two independent copies of it.
#[derive(Default)]
pub(crate) struct ContextState {
    progress_list: Vec<Arc<parking_lot::Mutex<Request>>>,
}

impl ContextState {
    /// `progress`: drive every outstanding request once, dropping each
    /// that has already reached a terminal status (its completion
    /// callback, if any, already fired inside `Request::apply` -- by
    /// whichever side, this pump or the caller's own `test`, got there
    /// first).
    fn progress_once(&mut self) {
        self.progress_list.retain(|req| {
            let s = req.lock().test();
            !s.is_terminal()
        });
    }

    /// `spec.md` §4.G's data-flow: "op's trigger posts initial p2p ->
    /// op is appended to the context's progress list" -- called from
    /// [`TrackedRequest::start`], not at request creation.
    pub(crate) fn push(&mut self, req: Arc<parking_lot::Mutex<Request>>) {
        self.progress_list.push(req);
    }

    /// "on final-step completion the op leaves the list" -- called
    /// from [`TrackedRequest::start`]/`test` once a request's own
    /// status latches terminal.
    pub(crate) fn remove(&mut self, req: &Arc<parking_lot::Mutex<Request>>) {
        self.progress_list.retain(|r| !Arc::ptr_eq(r, req));
    }
}

/// An out-of-band allgather: given this process's own entry, return
/// every peer's entry in rank order (`spec.md` §4.G step 6). The core
/// has no network layer of its own, so the caller injects this, same
/// as the location callback.
pub type OobAllgather = Box<dyn Fn(&ProcessInfo) -> UcgResult<Vec<ProcessInfo>> + Send + Sync>;

/// `init_version`'s compatibility check: reject if the caller's major
/// differs from this library's, or the caller's minor exceeds it.
pub const API_VERSION_MAJOR: u32 = 1;
pub const API_VERSION_MINOR: u32 = 0;

fn check_version(major: u32, minor: u32) -> UcgResult<()> {
    if major != API_VERSION_MAJOR || minor > API_VERSION_MINOR {
        return Err(UcgError::Incompatible);
    }
    Ok(())
}

/// Process-wide handle (`spec.md` §4.G). Owns the plugin registry, the
/// locked progress list, and the process-info table built at init from
/// the caller's OOB-allgather and location callbacks.
pub struct Context {
    config: Config,
    registry: PluginRegistry,
    selected: Vec<String>,
    lock: Arc<Lock>,
    my_rank: i32,
    process_infos: Vec<ProcessInfo>,
}

impl Context {
    /// `init`/`init_version`: verify the caller's requested API version,
    /// load the plugins named by `config.planc`, call each one's
    /// `context_init`, and exchange process-info via `oob_allgather`.
    pub fn init(
        major: u32,
        minor: u32,
        config: Config,
        my_rank: i32,
        location: Location,
        oob_allgather: OobAllgather,
    ) -> UcgResult<Self> {
        check_version(major, minor)?;
        init_logging(&config.log_level);

        let registry = register_builtin_plugins();
        let selected = config.selected_plugins(&registry.names());
        if selected.iter().any(|name| registry.get(name).is_none()) {
            return Err(UcgError::NoResource);
        }

        let mut thread_safe = true;
        let mut plugin_addr = Vec::new();
        for name in &selected {
            let plugin = registry.get(name).expect("validated above");
            plugin.context_init()?;
            thread_safe &= plugin.is_thread_safe();
            plugin_addr.extend(plugin.context_query());
        }

        let own_info = ProcessInfo { location, plugin_addr };
        let process_infos = oob_allgather(&own_info)?;

        // Every entry point touching `ContextState` always goes through
        // `lock`; a plugin reporting `is_thread_safe() == false` does not
        // change which primitive guards it, only that skipping the lock
        // entirely would be unsound (`spec.md` §4.G step 5 / §5).
        let lock = Arc::new(match config.use_mt_mutex {
            LockKind::Mutex => Lock::Mutex(parking_lot::Mutex::new(ContextState::default())),
            LockKind::Spin => Lock::Spin(SpinLock::new(ContextState::default())),
        });

        info!(plugins = ?selected, peers = process_infos.len(), thread_safe, "context initialised");
        Ok(Context { config, registry, selected, lock, my_rank, process_infos })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    #[must_use]
    pub fn selected_plugins(&self) -> &[String] {
        &self.selected
    }

    #[must_use]
    pub fn my_rank(&self) -> i32 {
        self.my_rank
    }

    #[must_use]
    pub fn process_infos(&self) -> &[ProcessInfo] {
        &self.process_infos
    }

    /// Wrap a freshly built request in a shared handle the caller can
    /// drive directly; the handle registers itself on this context's
    /// progress list once started, and removes itself once terminal, so
    /// the caller's own polling and a later `Context::progress()` call
    /// race to drive the same request (`spec.md` §4.G "Progress", §9's
    /// dual mechanism).
    pub(crate) fn track(&self, req: Request) -> TrackedRequest {
        TrackedRequest::new(req, self.lock.clone())
    }

    /// `progress`: under the context lock, drive every tracked request
    /// once (`spec.md` §4.G "Progress").
    pub fn progress(&self) {
        self.lock.with_state(ContextState::progress_once);
    }

    #[must_use]
    pub fn progress_list_len(&self) -> usize {
        self.lock.with_state(|state| state.progress_list.len())
    }

    /// `cleanup`: tear down every loaded plugin's context state. Groups
    /// must already have been destroyed by the caller (`spec.md` §4.G
    /// "Cleanup") -- this does not reach into group state itself.
    pub fn cleanup(self) {
        for name in &self.selected {
            if let Some(plugin) = self.registry.get(name) {
                plugin.context_cleanup();
            }
        }
        debug!("context cleaned up");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_oob(_: &ProcessInfo) -> UcgResult<Vec<ProcessInfo>> {
        Ok(vec![ProcessInfo::default()])
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let err = check_version(API_VERSION_MAJOR + 1, 0).unwrap_err();
        assert_eq!(err, UcgError::Incompatible);
        let err = check_version(API_VERSION_MAJOR, API_VERSION_MINOR + 1).unwrap_err();
        assert_eq!(err, UcgError::Incompatible);
        assert!(check_version(API_VERSION_MAJOR, 0).is_ok());
    }

    #[test]
    fn init_with_mutex_lock_succeeds() {
        let mut config = Config::default();
        config.use_mt_mutex = LockKind::Mutex;
        let ctx = Context::init(API_VERSION_MAJOR, 0, config, 0, Location::default(), Box::new(loopback_oob)).unwrap();
        assert_eq!(ctx.process_infos().len(), 1);
        assert_eq!(ctx.progress_list_len(), 0);
        ctx.cleanup();
    }

    #[test]
    fn init_with_spin_lock_succeeds() {
        let mut config = Config::default();
        config.use_mt_mutex = LockKind::Spin;
        let ctx = Context::init(API_VERSION_MAJOR, 0, config, 0, Location::default(), Box::new(loopback_oob)).unwrap();
        ctx.progress();
        ctx.cleanup();
    }

    struct ImmediateOp;
    impl crate::plan::PlanOp for ImmediateOp {
        fn trigger(&mut self) -> crate::error::Status {
            crate::error::Status::Ok
        }
        fn progress(&mut self) -> crate::error::Status {
            crate::error::Status::Ok
        }
        fn discard(&mut self) {}
    }

    #[test]
    fn tracked_request_registers_on_start_and_deregisters_once_terminal() {
        let ctx = Context::init(API_VERSION_MAJOR, 0, Config::default(), 0, Location::default(), Box::new(loopback_oob)).unwrap();
        let tracked = ctx.track(Request::new(Box::new(ImmediateOp)));
        assert_eq!(ctx.progress_list_len(), 0, "an unstarted request is not yet on the progress list");

        let mut ids = crate::request::RequestIdAllocator::new();
        let status = tracked.start(&mut ids);
        assert_eq!(status, crate::error::Status::Ok);

        // `ImmediateOp` completes synchronously inside `start`, so the
        // request is appended and immediately removed again in the same
        // call -- never left dangling on the list.
        assert_eq!(ctx.progress_list_len(), 0);
        ctx.cleanup();
    }

    struct OneStepOp {
        done: bool,
    }
    impl crate::plan::PlanOp for OneStepOp {
        fn trigger(&mut self) -> crate::error::Status {
            crate::error::Status::InProgress
        }
        fn progress(&mut self) -> crate::error::Status {
            if self.done {
                crate::error::Status::Ok
            } else {
                self.done = true;
                crate::error::Status::InProgress
            }
        }
        fn discard(&mut self) {}
    }

    #[test]
    fn context_progress_drains_a_request_nobody_tests_directly() {
        let ctx = Context::init(API_VERSION_MAJOR, 0, Config::default(), 0, Location::default(), Box::new(loopback_oob)).unwrap();
        let tracked = ctx.track(Request::new(Box::new(OneStepOp { done: false })));
        let mut ids = crate::request::RequestIdAllocator::new();

        assert_eq!(tracked.start(&mut ids), crate::error::Status::InProgress);
        assert_eq!(ctx.progress_list_len(), 1, "a started, in-progress request is on the progress list");

        ctx.progress();
        assert_eq!(ctx.progress_list_len(), 1);
        ctx.progress();
        assert_eq!(tracked.status(), crate::error::Status::Ok);
        assert_eq!(ctx.progress_list_len(), 0, "the context's own sweep drove it to completion and removed it");
        ctx.cleanup();
    }

    #[test]
    fn unknown_plugin_name_is_a_resource_error() {
        let mut config = Config::default();
        config.planc = "does-not-exist".to_string();
        let err = Context::init(API_VERSION_MAJOR, 0, config, 0, Location::default(), Box::new(loopback_oob)).unwrap_err();
        assert_eq!(err, UcgError::NoResource);
    }

    #[test]
    fn spin_lock_serialises_access() {
        let lock = std::sync::Arc::new(SpinLock::new(0u32));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }
}
