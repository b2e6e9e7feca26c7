//! Discovers interfaces matching the configured device list or regex,
//! attaches the XDP program to newly discovered ones, and prunes
//! watchers for interfaces that have disappeared.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use regex::Regex;
use storm_control_config::WatcherConfig;
use storm_control_core::{Error, InterfaceIndex, InterfaceInfo, InterfaceTable, Result};
use storm_control_ebpf::XdpHandle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::interfaces::{InterfaceLister, InterfaceSource};
use crate::netdev::NetDevWatcher;

pub struct Supervisor {
    watchers: AsyncMutex<HashMap<InterfaceIndex, Arc<NetDevWatcher>>>,
    program: Arc<dyn XdpHandle>,
    lister: Box<dyn InterfaceSource>,
    config: WatcherConfig,
    device_regex: Regex,
    cancel: CancellationToken,
    interface_table: InterfaceTable,
}

impl Supervisor {
    /// Opens a real netlink connection for interface discovery. For
    /// injecting a fake lister (tests), use [`Self::with_lister`].
    pub fn new(config: WatcherConfig, program: Arc<dyn XdpHandle>) -> Result<Self> {
        let lister = InterfaceLister::new()?;
        Self::with_lister(config, program, Box::new(lister))
    }

    pub fn with_lister(
        config: WatcherConfig,
        program: Arc<dyn XdpHandle>,
        lister: Box<dyn InterfaceSource>,
    ) -> Result<Self> {
        let device_regex = Regex::new(&config.device_regex)
            .map_err(|e| Error::InvalidRegex(config.device_regex.clone(), e))?;

        Ok(Self {
            watchers: AsyncMutex::new(HashMap::new()),
            program,
            lister,
            config,
            device_regex,
            cancel: CancellationToken::new(),
            interface_table: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Shared handle to the interfaces this supervisor currently tracks,
    /// kept fresh on every discovery tick. Used by the metrics collector.
    pub fn interface_table(&self) -> InterfaceTable {
        Arc::clone(&self.interface_table)
    }

    /// A static `device_list` overrides the regex entirely; an empty
    /// list falls back to matching `device_regex` against every host
    /// interface name.
    fn devices_for_attach(&self, all: &[InterfaceInfo]) -> Vec<InterfaceInfo> {
        if !self.config.device_list.is_empty() {
            all.iter().filter(|dev| self.config.device_list.contains(&dev.name)).cloned().collect()
        } else {
            all.iter().filter(|dev| self.device_regex.is_match(&dev.name)).cloned().collect()
        }
    }

    async fn find_and_attach(&self) {
        let all = match self.lister.list_interfaces().await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "error listing network interfaces");
                return;
            }
        };

        if let Ok(mut table) = self.interface_table.write() {
            table.clear();
            table.extend(all.iter().map(|dev| (dev.index, dev.clone())));
        }

        let candidates = self.devices_for_attach(&all);
        let mut watchers = self.watchers.lock().await;
        for dev in candidates {
            if watchers.contains_key(&dev.index) {
                continue;
            }
            info!(interface = %dev.describe(), "attaching xdp program");
            if let Err(e) = self.program.attach(dev.index) {
                warn!(interface = %dev.describe(), error = %e, "error attaching xdp program");
                continue;
            }

            let watcher = Arc::new(NetDevWatcher::new(
                dev.index,
                dev.name.clone(),
                self.config.block_threshold,
                Duration::from_secs(self.config.block_delay),
                Arc::clone(&self.program),
            ));
            watchers.insert(dev.index, Arc::clone(&watcher));

            // Block action is globally disabled: keep the map entries and
            // the XDP attach, but never run the block-decision loop.
            if self.config.block_enabled {
                tokio::spawn(watcher.run());
            }
        }
    }

    async fn clean(&self) {
        let all = match self.lister.list_interfaces().await {
            Ok(all) => all,
            Err(e) => {
                warn!(error = %e, "error listing network interfaces");
                return;
            }
        };
        let present: HashSet<InterfaceIndex> = all.iter().map(|dev| dev.index).collect();

        let mut watchers = self.watchers.lock().await;
        let program = &self.program;
        watchers.retain(|idx, watcher| {
            if present.contains(idx) {
                return true;
            }
            info!(interface = %watcher.describe(), "interface gone, stopping watcher");
            watcher.stop();
            program.force_detach(*idx);
            false
        });
    }

    async fn run_dynamic_discovery(&self) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.find_and_attach().await;
                    self.clean().await;
                }
            }
        }
    }

    /// Runs the 1-second discovery loop until [`Self::stop`] is called.
    /// Does not return until then.
    #[instrument(skip(self))]
    pub async fn start(&self) {
        info!("starting device watcher");
        if !self.config.block_enabled {
            warn!("block action disabled, interfaces will be attached but never blocked");
        }
        self.run_dynamic_discovery().await;
    }

    /// Stops discovery, stops every watcher, force-detaches every
    /// interface, and releases the XDP program.
    pub async fn stop(&self) {
        info!("stopping device watcher");
        self.cancel.cancel();
        self.stop_dev_watchers().await;
        self.program.close();
    }

    pub async fn stop_dev_watchers(&self) {
        let mut watchers = self.watchers.lock().await;
        for (idx, watcher) in watchers.drain() {
            watcher.stop();
            self.program.force_detach(idx);
        }
    }
}

#[cfg(test)]
impl<T: InterfaceSource + ?Sized> InterfaceSource for Arc<T> {
    fn list_interfaces(&self) -> futures::future::BoxFuture<'_, Result<Vec<InterfaceInfo>, Error>> {
        (**self).list_interfaces()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::FakeInterfaceSource;
    use storm_control_ebpf::FakeXdpHandle;

    fn info(index: InterfaceIndex, name: &str) -> InterfaceInfo {
        InterfaceInfo { index, name: name.to_string() }
    }

    fn test_config(device_list: Vec<String>) -> WatcherConfig {
        WatcherConfig {
            block_delay: 0,
            block_enabled: false,
            block_threshold: 10,
            device_list,
            device_regex: r"^tap.{8}-.{2}$".to_string(),
        }
    }

    /// A real `Supervisor`, backed by a fake kernel handle and a fake,
    /// mutable interface list instead of a live netlink connection —
    /// mirroring how the original reassigns `listInterfaces` and mocks
    /// `eBPFProg` in its own tests.
    fn test_supervisor(
        config: WatcherConfig,
        listed: Vec<InterfaceInfo>,
    ) -> (Supervisor, Arc<FakeXdpHandle>, Arc<FakeInterfaceSource>) {
        let handle = Arc::new(FakeXdpHandle::new());
        let source = Arc::new(FakeInterfaceSource::new(listed));
        let supervisor = Supervisor::with_lister(
            config,
            Arc::clone(&handle) as Arc<dyn XdpHandle>,
            Box::new(Arc::clone(&source)),
        )
        .unwrap();
        (supervisor, handle, source)
    }

    #[test]
    fn static_device_list_overrides_regex() {
        let config = test_config(vec!["eth0".to_string()]);
        let (supervisor, ..) = test_supervisor(config, Vec::new());
        let all = vec![info(1, "eth0"), info(2, "tap12345678-01"), info(3, "lo")];
        let result = supervisor.devices_for_attach(&all);
        assert_eq!(result, vec![info(1, "eth0")]);
    }

    #[test]
    fn regex_matches_when_no_static_list() {
        let config = test_config(Vec::new());
        let (supervisor, ..) = test_supervisor(config, Vec::new());
        let all = vec![info(1, "eth0"), info(2, "tap12345678-01"), info(3, "lo")];
        let result = supervisor.devices_for_attach(&all);
        assert_eq!(result, vec![info(2, "tap12345678-01")]);
    }

    #[tokio::test]
    async fn discovery_attaches_newly_listed_interfaces() {
        let config = test_config(vec!["tap0".to_string()]);
        let (supervisor, handle, _source) = test_supervisor(config, vec![info(5, "tap0")]);

        supervisor.find_and_attach().await;

        assert!(handle.is_attached(5));
        assert!(supervisor.watchers.lock().await.contains_key(&5));
        assert_eq!(supervisor.interface_table().read().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn discovery_skips_interfaces_whose_attach_fails() {
        let config = test_config(vec!["tap0".to_string()]);
        let (supervisor, handle, _source) = test_supervisor(config, vec![info(5, "tap0")]);
        handle.fail_drop_insert_for(5);

        supervisor.find_and_attach().await;

        assert!(!handle.is_attached(5));
        assert!(!supervisor.watchers.lock().await.contains_key(&5));
    }

    #[tokio::test]
    async fn rediscovery_does_not_reattach_an_already_tracked_interface() {
        let config = test_config(vec!["tap0".to_string()]);
        let (supervisor, handle, _source) = test_supervisor(config, vec![info(5, "tap0")]);

        supervisor.find_and_attach().await;
        supervisor.find_and_attach().await;

        assert_eq!(supervisor.watchers.lock().await.len(), 1);
        assert!(handle.is_attached(5));
    }

    #[tokio::test]
    async fn disappeared_interface_is_force_detached_and_untracked() {
        let config = test_config(vec!["tap0".to_string()]);
        let (supervisor, handle, source) = test_supervisor(config, vec![info(5, "tap0")]);
        supervisor.find_and_attach().await;
        assert!(handle.is_attached(5));

        source.set(Vec::new());
        supervisor.clean().await;

        assert!(!handle.is_attached(5));
        assert!(!supervisor.watchers.lock().await.contains_key(&5));
    }
}
