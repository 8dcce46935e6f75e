//! Idle-expiring key/value cache shared by the rate limiting algorithms.
//!
//! Every read or write refreshes an entry's last access time. A background
//! sweep removes entries that have been idle for longer than `max_idle`, and
//! a much slower monitor logs when the cache grows past a warning threshold.
//! Both background tasks are owned by the cache and stop on [`TtlCache::shutdown`]
//! or when the cache is dropped.

use crate::error::{ThrottlerError, ThrottlerResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Minimal cache contract used by the limiters and their callers.
///
/// All operations are infallible. A missing key from `get` is a normal
/// outcome meaning "use the default state".
pub trait Cache<V>: Send + Sync {
    fn put(&self, key: &str, value: V);
    fn get(&self, key: &str) -> Option<V>;
    fn delete(&self, key: &str);
    fn name(&self) -> &str;
}

/// Tuning for a [`TtlCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub name: String,
    pub max_idle: Duration,
    pub sweep_interval: Duration,
    pub warning_threshold: usize,
    pub warning_window: Duration,
    pub monitor_interval: Duration,
}

impl CacheOptions {
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_WARNING_THRESHOLD: usize = 1000;
    pub const DEFAULT_WARNING_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
    pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(name: impl Into<String>, max_idle: Duration) -> Self {
        Self {
            name: name.into(),
            max_idle,
            sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
            warning_threshold: Self::DEFAULT_WARNING_THRESHOLD,
            warning_window: Self::DEFAULT_WARNING_WINDOW,
            monitor_interval: Self::DEFAULT_MONITOR_INTERVAL,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_warning_threshold(mut self, threshold: usize) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn with_warning_window(mut self, window: Duration) -> Self {
        self.warning_window = window;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    fn validate(&self) -> ThrottlerResult<()> {
        if self.max_idle.is_zero() {
            return Err(ThrottlerError::Configuration(
                "max idle duration must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ThrottlerError::Configuration(
                "sweep interval must be greater than 0".to_string(),
            ));
        }
        if self.monitor_interval.is_zero() {
            return Err(ThrottlerError::Configuration(
                "monitor interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

struct CacheEntry<V> {
    value: V,
    last_access: Instant,
}

struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    last_warning: Option<Instant>,
}

struct Shared<V> {
    name: String,
    max_idle: Duration,
    warning_threshold: usize,
    warning_window: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V> Shared<V> {
    // A panic inside a background task must not wedge foreground probes,
    // so a poisoned lock is taken over as-is.
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_access) <= self.max_idle);
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(cache = %self.name, removed, remaining = state.entries.len(), "Swept idle entries");
        }
        removed
    }

    fn check_size_warning(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        let count = state.entries.len();
        let window_elapsed = state
            .last_warning
            .map_or(true, |at| now.saturating_duration_since(at) > self.warning_window);

        if count > self.warning_threshold && window_elapsed {
            warn!(
                cache = %self.name,
                entries = count,
                threshold = self.warning_threshold,
                "Cache size is above warning threshold"
            );
            state.last_warning = Some(now);
            true
        } else {
            false
        }
    }
}

/// Thread-safe idle-expiring map from string keys to `V`.
pub struct TtlCache<V> {
    shared: Arc<Shared<V>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<V> TtlCache<V>
where
    V: Send + 'static,
{
    /// Builds the cache and starts its sweep and size monitor on the current
    /// tokio runtime.
    pub fn new(options: CacheOptions) -> ThrottlerResult<Self> {
        options.validate()?;
        let handle = Handle::try_current().map_err(|_| ThrottlerError::RuntimeUnavailable)?;

        let shared = Arc::new(Shared {
            name: options.name,
            max_idle: options.max_idle,
            warning_threshold: options.warning_threshold,
            warning_window: options.warning_window,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_warning: None,
            }),
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let sweeper = {
            let shared = Arc::clone(&shared);
            spawn_supervised(
                &handle,
                format!("{}:sweep", shared.name),
                options.sweep_interval,
                shutdown_rx.clone(),
                move || {
                    shared.purge_expired();
                },
            )
        };
        let monitor = {
            let shared = Arc::clone(&shared);
            spawn_supervised(
                &handle,
                format!("{}:monitor", shared.name),
                options.monitor_interval,
                shutdown_rx,
                move || {
                    shared.check_size_warning();
                },
            )
        };

        info!(
            cache = %shared.name,
            max_idle = ?shared.max_idle,
            sweep_interval = ?options.sweep_interval,
            "Cache started"
        );

        Ok(Self {
            shared,
            shutdown,
            tasks: Mutex::new(vec![sweeper, monitor]),
        })
    }
}

impl<V> TtlCache<V> {
    /// Runs `f` on the entry for `key` while holding the cache lock, creating
    /// it with `init` when absent. The entry's last access time is refreshed.
    ///
    /// This is the only way the limiters touch their state, so a whole
    /// load/compute/store sequence is linearized per cache.
    pub fn with_entry<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> V,
        f: impl FnOnce(&mut V) -> R,
    ) -> R {
        let now = Instant::now();
        let mut state = self.shared.lock();

        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_access = now;
            return f(&mut entry.value);
        }

        let mut value = init();
        let result = f(&mut value);
        state.entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                last_access: now,
            },
        );
        result
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_idle(&self) -> Duration {
        self.shared.max_idle
    }

    /// Removes every entry idle for longer than `max_idle`. The background
    /// sweep calls this once per tick.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    /// Logs once per warning window while the cache holds more entries than
    /// the warning threshold. Returns whether a warning was emitted.
    pub fn check_size_warning(&self) -> bool {
        self.shared.check_size_warning()
    }

    /// Stops the sweep and monitor tasks. Entries stay readable, but no
    /// longer expire.
    pub fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        info!(cache = %self.shared.name, "Cache background tasks stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl<V> Cache<V> for TtlCache<V>
where
    V: Clone + Send,
{
    fn put(&self, key: &str, value: V) {
        let now = Instant::now();
        self.shared.lock().entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                last_access: now,
            },
        );
    }

    fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.shared.lock();
        state.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.value.clone()
        })
    }

    fn delete(&self, key: &str) {
        self.shared.lock().entries.remove(key);
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<V> Drop for TtlCache<V> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs `tick` every `every` until `shutdown` flips. A panicking tick is
/// logged and the periodic task is started again.
pub(crate) fn spawn_supervised<F>(
    handle: &Handle,
    task: String,
    every: Duration,
    shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let tick = Arc::new(tick);
    handle.spawn(async move {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let worker = tokio::spawn(run_periodic(every, shutdown.clone(), Arc::clone(&tick)));
            match worker.await {
                Ok(()) => return,
                Err(err) if err.is_panic() => {
                    error!(task = %task, "Background task panicked, restarting");
                }
                Err(_) => return,
            }
        }
    })
}

async fn run_periodic<F>(every: Duration, mut shutdown: watch::Receiver<bool>, tick: Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => tick(),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
