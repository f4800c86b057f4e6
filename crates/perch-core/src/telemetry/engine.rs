//! Shared hardware sampling.
//!
//! One timer drives every domain. A domain is refreshed only while it has
//! at least one subscriber, and the refresh itself runs on the blocking
//! pool. Readings are published as immutable snapshots and delivered to
//! subscribers by a per-domain dispatch task, in order, never on the
//! sampling thread. A dispatcher that falls behind skips to the newest
//! reading instead of queueing the ones it missed.
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::kernel::component::KernelComponent;
use crate::kernel::error::Result as KernelResult;
use crate::plugin_system::guard::panic_message;
use crate::storage::config::TelemetryConfig;
use crate::telemetry::error::TelemetryError;
use crate::telemetry::monitor::HardwareMonitor;
use crate::telemetry::stats::{DomainSample, DomainStats, HardwareDomain};

pub type TelemetryCallback = Arc<dyn Fn(&DomainSample) + Send + Sync>;

type LatestSample = Option<Arc<DomainSample>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingIntervals {
    pub normal: Duration,
    pub low_power: Duration,
}

impl SamplingIntervals {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            normal: Duration::from_millis(config.interval_ms.max(1)),
            low_power: Duration::from_millis(config.low_power_interval_ms.max(1)),
        }
    }
}

impl Default for SamplingIntervals {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Domains refreshed successfully, in domain order.
    Sampled(Vec<HardwareDomain>),
    /// A previous refresh was still running.
    Skipped,
    /// No domain had subscribers.
    Idle,
}

struct Subscriber {
    id: u64,
    callback: TelemetryCallback,
}

struct Shared {
    monitor: Arc<dyn HardwareMonitor>,
    subscribers: Mutex<HashMap<HardwareDomain, Vec<Subscriber>>>,
    snapshots: HashMap<HardwareDomain, ArcSwapOption<DomainSample>>,
    sequences: HashMap<HardwareDomain, AtomicU64>,
    publishers: Mutex<HashMap<HardwareDomain, watch::Sender<LatestSample>>>,
    refreshing: AtomicBool,
    next_id: AtomicU64,
}

struct RefreshFlag<'a>(&'a AtomicBool);

impl Drop for RefreshFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    fn active_domains(&self) -> Vec<HardwareDomain> {
        let subscribers = self.subscribers.lock();
        let mut domains: Vec<HardwareDomain> = subscribers
            .iter()
            .filter(|(_, subs)| !subs.is_empty())
            .map(|(domain, _)| *domain)
            .collect();
        domains.sort();
        domains
    }

    fn callbacks(&self, domain: HardwareDomain) -> Vec<TelemetryCallback> {
        self.subscribers
            .lock()
            .get(&domain)
            .map(|subs| subs.iter().map(|s| s.callback.clone()).collect())
            .unwrap_or_default()
    }

    fn remove(&self, domain: HardwareDomain, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(subs) = subscribers.get_mut(&domain) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                subscribers.remove(&domain);
                debug!("Last subscriber of {} left, sampling stops", domain);
            }
        }
    }

    async fn tick(self: Arc<Self>) -> TickOutcome {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Telemetry refresh still running, skipping tick");
            return TickOutcome::Skipped;
        }
        let _flag = RefreshFlag(&self.refreshing);

        let domains = self.active_domains();
        if domains.is_empty() {
            return TickOutcome::Idle;
        }

        let monitor = self.monitor.clone();
        let refreshed = tokio::task::spawn_blocking(move || {
            domains
                .into_iter()
                .map(|domain| (domain, refresh_guarded(monitor.as_ref(), domain)))
                .collect::<Vec<_>>()
        })
        .await;
        let refreshed = match refreshed {
            Ok(refreshed) => refreshed,
            Err(e) => {
                error!("Telemetry refresh task failed: {}", e);
                return TickOutcome::Sampled(Vec::new());
            }
        };

        let mut sampled = Vec::new();
        for (domain, result) in refreshed {
            match result {
                Ok(stats) if stats.domain() == domain => {
                    let sequence = self
                        .sequences
                        .get(&domain)
                        .map(|s| s.fetch_add(1, Ordering::AcqRel) + 1)
                        .unwrap_or(0);
                    let sample = Arc::new(DomainSample {
                        sequence,
                        taken_at: SystemTime::now(),
                        stats,
                    });
                    if let Some(slot) = self.snapshots.get(&domain) {
                        slot.store(Some(sample.clone()));
                    }
                    self.publish(domain, sample);
                    sampled.push(domain);
                }
                Ok(stats) => warn!("Monitor returned {} stats for {}", stats.domain(), domain),
                // The previous snapshot stays published.
                Err(e) => warn!("Refreshing {} failed: {}", domain, e),
            }
        }
        TickOutcome::Sampled(sampled)
    }

    fn publish(&self, domain: HardwareDomain, sample: Arc<DomainSample>) {
        let mut publishers = self.publishers.lock();
        if let Some(sender) = publishers.get(&domain) {
            if sender.send(Some(sample)).is_err() {
                publishers.remove(&domain);
            }
        }
    }
}

/// Handle for one telemetry subscription. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    domain: HardwareDomain,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn domain(&self) -> HardwareDomain {
        self.domain
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.remove(self.domain, self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("domain", &self.domain)
            .finish()
    }
}

pub struct TelemetryEngine {
    name: &'static str,
    shared: Arc<Shared>,
    intervals: SamplingIntervals,
    power_mode: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl TelemetryEngine {
    pub fn new(monitor: Arc<dyn HardwareMonitor>, intervals: SamplingIntervals) -> Self {
        let shared = Shared {
            monitor,
            subscribers: Mutex::new(HashMap::new()),
            snapshots: HardwareDomain::ALL
                .into_iter()
                .map(|d| (d, ArcSwapOption::empty()))
                .collect(),
            sequences: HardwareDomain::ALL
                .into_iter()
                .map(|d| (d, AtomicU64::new(0)))
                .collect(),
            publishers: Mutex::new(HashMap::new()),
            refreshing: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        };
        let (power_mode, _) = watch::channel(false);
        Self {
            name: "TelemetryEngine",
            shared: Arc::new(shared),
            intervals,
            power_mode,
            timer: Mutex::new(None),
            dispatchers: Mutex::new(Vec::new()),
        }
    }

    /// Registers `callback` for readings of `domain`. Sampling of the domain
    /// starts with its first subscriber and stops with its last.
    pub fn subscribe<F>(&self, domain: HardwareDomain, callback: F) -> Subscription
    where
        F: Fn(&DomainSample) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .lock()
            .entry(domain)
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        debug!("Subscriber {} added for {}", id, domain);
        Subscription {
            id,
            domain,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn subscriber_count(&self, domain: HardwareDomain) -> usize {
        self.shared
            .subscribers
            .lock()
            .get(&domain)
            .map_or(0, Vec::len)
    }

    pub fn active_domains(&self) -> Vec<HardwareDomain> {
        self.shared.active_domains()
    }

    /// Latest successful reading of `domain`, if any.
    pub fn snapshot(&self, domain: HardwareDomain) -> Option<Arc<DomainSample>> {
        self.shared.snapshots.get(&domain).and_then(|slot| slot.load_full())
    }

    /// Runs one refresh immediately, subject to the same overlap rule as
    /// timer ticks.
    pub async fn sample_now(&self) -> TickOutcome {
        self.shared.clone().tick().await
    }

    pub fn power_mode(&self) -> watch::Receiver<bool> {
        self.power_mode.subscribe()
    }

    pub fn is_low_power(&self) -> bool {
        *self.power_mode.borrow()
    }

    pub fn current_interval(&self) -> Duration {
        if self.is_low_power() {
            self.intervals.low_power
        } else {
            self.intervals.normal
        }
    }

    /// Switches between the normal and low-power sampling interval. The
    /// running timer is restarted with the new interval.
    pub fn set_power_mode(&self, low_power: bool) {
        let changed = self.power_mode.send_if_modified(|current| {
            if *current == low_power {
                false
            } else {
                *current = low_power;
                true
            }
        });
        if !changed {
            return;
        }
        info!(
            "Power mode now {}, sampling every {:?}",
            if low_power { "low" } else { "normal" },
            self.current_interval()
        );
        let mut timer = self.timer.lock();
        if let Some(handle) = timer.take() {
            handle.abort();
            *timer = Some(self.spawn_timer());
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Starts the timer and dispatch tasks. Must be called from within a
    /// Tokio runtime. Does nothing when already running.
    pub fn start(&self) {
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let mut publishers = self.shared.publishers.lock();
        let mut dispatchers = self.dispatchers.lock();
        publishers.clear();
        for domain in HardwareDomain::ALL {
            let (sender, receiver) = watch::channel(None);
            publishers.insert(domain, sender);
            dispatchers.push(tokio::spawn(dispatch(
                Arc::downgrade(&self.shared),
                domain,
                receiver,
            )));
        }
        *timer = Some(self.spawn_timer());
        info!("Telemetry engine started, sampling every {:?}", self.current_interval());
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
        self.shared.publishers.lock().clear();
        for handle in self.dispatchers.lock().drain(..) {
            handle.abort();
        }
    }

    fn spawn_timer(&self) -> JoinHandle<()> {
        tokio::spawn(run_timer(Arc::downgrade(&self.shared), self.current_interval()))
    }
}

async fn run_timer(shared: Weak<Shared>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        // Detached so a slow refresh never delays the next tick.
        tokio::spawn(shared.tick());
    }
}

/// A panicking monitor fails only the domain it was refreshing.
fn refresh_guarded(
    monitor: &dyn HardwareMonitor,
    domain: HardwareDomain,
) -> Result<DomainStats, TelemetryError> {
    panic::catch_unwind(AssertUnwindSafe(|| monitor.refresh(domain))).unwrap_or_else(|payload| {
        Err(TelemetryError::Panicked {
            domain,
            message: panic_message(payload.as_ref()),
        })
    })
}

async fn dispatch(shared: Weak<Shared>, domain: HardwareDomain, mut receiver: watch::Receiver<LatestSample>) {
    let mut delivered = 0;
    while receiver.changed().await.is_ok() {
        let Some(sample) = receiver.borrow_and_update().clone() else {
            continue;
        };
        if sample.sequence <= delivered {
            continue;
        }
        if sample.sequence > delivered + 1 && delivered > 0 {
            debug!("{} subscribers skipped {} stale sample(s)", domain, sample.sequence - delivered - 1);
        }
        delivered = sample.sequence;
        let callbacks = match shared.upgrade() {
            Some(shared) => shared.callbacks(domain),
            None => break,
        };
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(&sample))) {
                warn!(
                    "Telemetry subscriber for {} panicked: {}",
                    domain,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

impl Drop for TelemetryEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TelemetryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryEngine")
            .field("name", &self.name)
            .field("intervals", &self.intervals)
            .field("low_power", &self.is_low_power())
            .field("active_domains", &self.active_domains())
            .finish()
    }
}

#[async_trait]
impl KernelComponent for TelemetryEngine {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn initialize(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn start(&self) -> KernelResult<()> {
        TelemetryEngine::start(self);
        Ok(())
    }

    async fn stop(&self) -> KernelResult<()> {
        TelemetryEngine::stop(self);
        Ok(())
    }
}
