//! Per-interface block/unblock state machine.
//!
//! One [`NetDevWatcher`] runs for each attached interface: a 1-second
//! loop decides when to block a traffic class (delta of passed packets
//! above `block_threshold`), and each block spawns an independent
//! unblock sub-task that waits `block_delay` then polls every 3 seconds
//! until the dropped-packet delta falls back under `unblock_threshold`
//! (3x the block threshold).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use storm_control_core::{InterfaceIndex, PacketCounter, Result, TrafficClass};
#[cfg(test)]
use storm_control_core::TrafficCounters;
use storm_control_ebpf::XdpHandle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Per-class intent: `Some(true)` blocks, `Some(false)` unblocks,
/// `None` leaves the class untouched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ClassUpdate {
    broadcast: Option<bool>,
    ipv4_multicast: Option<bool>,
    ipv6_multicast: Option<bool>,
    other_multicast: Option<bool>,
}

impl ClassUpdate {
    fn is_empty(&self) -> bool {
        self.broadcast.is_none()
            && self.ipv4_multicast.is_none()
            && self.ipv6_multicast.is_none()
            && self.other_multicast.is_none()
    }

    fn get(&self, class: TrafficClass) -> Option<bool> {
        match class {
            TrafficClass::Broadcast => self.broadcast,
            TrafficClass::Ipv4Multicast => self.ipv4_multicast,
            TrafficClass::Ipv6Multicast => self.ipv6_multicast,
            TrafficClass::OtherMulticast => self.other_multicast,
        }
    }

    fn set(&mut self, class: TrafficClass, value: bool) {
        let slot = match class {
            TrafficClass::Broadcast => &mut self.broadcast,
            TrafficClass::Ipv4Multicast => &mut self.ipv4_multicast,
            TrafficClass::Ipv6Multicast => &mut self.ipv6_multicast,
            TrafficClass::OtherMulticast => &mut self.other_multicast,
        };
        *slot = Some(value);
    }
}

/// One atomic latch per traffic class, acquired by the unblock sub-task
/// for the lifetime of its polling loop. Guarantees at most one unblock
/// sub-task per (interface, class) at any time.
#[derive(Default)]
struct DropLatches {
    broadcast: AtomicBool,
    ipv4_multicast: AtomicBool,
    ipv6_multicast: AtomicBool,
    other_multicast: AtomicBool,
}

impl DropLatches {
    fn slot(&self, class: TrafficClass) -> &AtomicBool {
        match class {
            TrafficClass::Broadcast => &self.broadcast,
            TrafficClass::Ipv4Multicast => &self.ipv4_multicast,
            TrafficClass::Ipv6Multicast => &self.ipv6_multicast,
            TrafficClass::OtherMulticast => &self.other_multicast,
        }
    }

    fn acquire(&self, class: TrafficClass) -> bool {
        self.slot(class).compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    fn release(&self, class: TrafficClass) {
        self.slot(class).store(false, Ordering::Release);
    }
}

pub struct NetDevWatcher {
    index: InterfaceIndex,
    name: String,
    block_threshold: u64,
    unblock_threshold: u64,
    block_delay: Duration,
    program: Arc<dyn XdpHandle>,
    cancel: CancellationToken,
    drop_map_mutex: AsyncMutex<()>,
    latches: DropLatches,
}

impl NetDevWatcher {
    pub fn new(
        index: InterfaceIndex,
        name: String,
        block_threshold: u64,
        block_delay: Duration,
        program: Arc<dyn XdpHandle>,
    ) -> Self {
        Self {
            index,
            name,
            block_threshold,
            unblock_threshold: block_threshold.saturating_mul(3),
            block_delay,
            program,
            cancel: CancellationToken::new(),
            drop_map_mutex: AsyncMutex::new(()),
            latches: DropLatches::default(),
        }
    }

    pub fn index(&self) -> InterfaceIndex {
        self.index
    }

    pub fn describe(&self) -> String {
        format!("{} ({})", self.name, self.index)
    }

    /// Signals every task spawned from this watcher (the block loop and
    /// any in-flight unblock sub-tasks) to stop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    fn stats(&self) -> Result<PacketCounter> {
        self.program.stats(self.index)
    }

    async fn apply_drop_update(&self, update: ClassUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let _guard = self.drop_map_mutex.lock().await;
        let mut cfg = self.program.drop_config(self.index)?;
        for class in TrafficClass::ALL {
            if let Some(blocked) = update.get(class) {
                cfg.set_class(class, blocked);
            }
        }
        self.program.drop_update(self.index, cfg)
    }

    fn block_decision(&self, previous: &PacketCounter, current: &PacketCounter) -> ClassUpdate {
        let mut update = ClassUpdate::default();
        for class in TrafficClass::ALL {
            let delta = current.class(class).passed.wrapping_sub(previous.class(class).passed);
            if delta > self.block_threshold {
                debug!(interface = %self.describe(), %class, "blocking traffic class");
                update.set(class, true);
            }
        }
        update
    }

    fn spawn_unblock_watchers(self: &Arc<Self>, update: ClassUpdate) {
        for class in TrafficClass::ALL {
            if update.get(class).is_some() {
                let watcher = Arc::clone(self);
                tokio::spawn(async move { watcher.watch_unblock(class).await });
            }
        }
    }

    /// The 1-second block-decision loop. One instance runs per attached
    /// interface; cancelled via [`Self::stop`].
    #[instrument(skip(self), fields(interface = %self.describe()))]
    pub async fn run(self: Arc<Self>) {
        let mut previous = match self.stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "initial stats read failed, starting from zero");
                PacketCounter::default()
            }
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(interface = %self.describe(), "stop received, stopping block loop");
                    return;
                }
                _ = ticker.tick() => {
                    let current = match self.stats() {
                        Ok(stats) => stats,
                        Err(e) => {
                            warn!(error = %e, "error reading statistics");
                            continue;
                        }
                    };
                    let update = self.block_decision(&previous, &current);
                    previous = current;
                    if update.is_empty() {
                        continue;
                    }
                    if let Err(e) = self.apply_drop_update(update).await {
                        warn!(error = %e, "error blocking traffic");
                        continue;
                    }
                    self.spawn_unblock_watchers(update);
                }
            }
        }
    }

    async fn check_and_unblock(
        &self,
        previous: &PacketCounter,
        current: &PacketCounter,
        class: TrafficClass,
    ) -> Result<bool> {
        let delta = current.class(class).dropped.wrapping_sub(previous.class(class).dropped);
        if delta < self.unblock_threshold {
            let mut update = ClassUpdate::default();
            update.set(class, false);
            self.apply_drop_update(update).await?;
            debug!(interface = %self.describe(), %class, "unblocking traffic class");
            return Ok(true);
        }
        Ok(false)
    }

    /// Waits `block_delay`, then polls every 3 seconds until the class's
    /// dropped-packet delta falls back under the unblock threshold.
    async fn watch_unblock(self: Arc<Self>, class: TrafficClass) {
        if !self.latches.acquire(class) {
            return;
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.latches.release(class);
                return;
            }
            _ = tokio::time::sleep(self.block_delay) => {}
        }

        let mut previous = match self.stats() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "error reading statistics");
                PacketCounter::default()
            }
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(3));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(interface = %self.describe(), "stop received, stopping unblock watcher");
                    break;
                }
                _ = ticker.tick() => {
                    let current = match self.stats() {
                        Ok(stats) => stats,
                        Err(e) => {
                            warn!(error = %e, "error reading statistics");
                            continue;
                        }
                    };
                    match self.check_and_unblock(&previous, &current, class).await {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "error checking unblock status"),
                    }
                    previous = current;
                }
            }
        }

        self.latches.release(class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storm_control_ebpf::FakeXdpHandle;

    fn counter_with(class: TrafficClass, passed: u64, dropped: u64) -> PacketCounter {
        let mut counter = PacketCounter::default();
        *counter.class_mut(class) = TrafficCounters { passed, dropped };
        counter
    }

    /// A watcher backed by a fake kernel handle, with interface 1
    /// already attached so drop-map reads/writes in `check_and_unblock`
    /// have somewhere to land.
    fn watcher(block_threshold: u64, handle: Arc<FakeXdpHandle>) -> NetDevWatcher {
        handle.attach(1).unwrap();
        NetDevWatcher::new(1, "eth0".to_string(), block_threshold, Duration::from_secs(0), handle)
    }

    #[test]
    fn block_decision_trips_when_delta_exceeds_threshold() {
        let watcher = watcher(10, Arc::new(FakeXdpHandle::new()));
        let previous = PacketCounter::default();
        let current = counter_with(TrafficClass::Broadcast, 100, 0);
        let update = watcher.block_decision(&previous, &current);
        assert_eq!(update.get(TrafficClass::Broadcast), Some(true));
    }

    #[test]
    fn block_decision_holds_at_exact_threshold() {
        let watcher = watcher(10, Arc::new(FakeXdpHandle::new()));
        let previous = PacketCounter::default();
        let current = counter_with(TrafficClass::Broadcast, 10, 0);
        let update = watcher.block_decision(&previous, &current);
        assert_eq!(update.get(TrafficClass::Broadcast), None, "delta == threshold must not block (strict >)");
    }

    #[test]
    fn block_decision_ignores_untouched_classes() {
        let watcher = watcher(10, Arc::new(FakeXdpHandle::new()));
        let previous = PacketCounter::default();
        let current = counter_with(TrafficClass::Broadcast, 100, 0);
        let update = watcher.block_decision(&previous, &current);
        assert_eq!(update.get(TrafficClass::Ipv4Multicast), None);
    }

    #[tokio::test]
    async fn check_and_unblock_unblocks_when_delta_under_threshold() {
        let handle = Arc::new(FakeXdpHandle::new());
        let watcher = watcher(10, Arc::clone(&handle)); // unblock_threshold = 30
        let previous = PacketCounter::default();
        let current = counter_with(TrafficClass::Broadcast, 0, 1);
        let unblocked =
            watcher.check_and_unblock(&previous, &current, TrafficClass::Broadcast).await.unwrap();
        assert!(unblocked);
        assert!(!handle.drop_config(1).unwrap().broadcast);
    }

    #[tokio::test]
    async fn check_and_unblock_holds_when_delta_well_above_threshold() {
        let handle = Arc::new(FakeXdpHandle::new());
        let watcher = watcher(10, Arc::clone(&handle));
        let previous = PacketCounter::default();
        let current = counter_with(TrafficClass::Broadcast, 0, 100);
        let unblocked =
            watcher.check_and_unblock(&previous, &current, TrafficClass::Broadcast).await.unwrap();
        assert!(!unblocked);
    }

    #[tokio::test]
    async fn check_and_unblock_holds_at_exact_threshold_boundary() {
        let handle = Arc::new(FakeXdpHandle::new());
        let watcher = watcher(10, Arc::clone(&handle)); // unblock_threshold = 30
        let previous = PacketCounter::default();
        let current = counter_with(TrafficClass::Broadcast, 0, 30);
        let unblocked =
            watcher.check_and_unblock(&previous, &current, TrafficClass::Broadcast).await.unwrap();
        assert!(!unblocked, "delta == unblock_threshold must not unblock (strict <)");
    }

    #[test]
    fn class_update_tracks_only_touched_classes() {
        let mut update = ClassUpdate::default();
        assert!(update.is_empty());
        update.set(TrafficClass::Ipv4Multicast, true);
        assert!(!update.is_empty());
        assert_eq!(update.get(TrafficClass::Ipv4Multicast), Some(true));
        assert_eq!(update.get(TrafficClass::Broadcast), None);
    }

    #[test]
    fn latch_excludes_concurrent_acquisition() {
        let latches = DropLatches::default();
        assert!(latches.acquire(TrafficClass::Broadcast));
        assert!(!latches.acquire(TrafficClass::Broadcast));
        latches.release(TrafficClass::Broadcast);
        assert!(latches.acquire(TrafficClass::Broadcast));
    }

    #[test]
    fn latches_are_independent_per_class() {
        let latches = DropLatches::default();
        assert!(latches.acquire(TrafficClass::Broadcast));
        assert!(latches.acquire(TrafficClass::Ipv6Multicast));
    }
}
