//! Lifecycle of the XDP program: loading the object image, attaching it
//! to interfaces (generic mode), and tearing it down again.

use std::collections::HashMap;
use std::sync::Mutex;

use libbpf_rs::{MapCore, MapHandle, Object, ObjectBuilder, XdpFlags};
use storm_control_core::{DropConfig, Error, InterfaceIndex, PacketCounter, Result};
use tracing::{info, instrument, warn};

use crate::maps::MapClient;

pub const PROGRAM_NAME: &str = "storm_control";
pub const STATS_MAP_NAME: &str = "intf_stats";
pub const DROP_MAP_NAME: &str = "drop_intf";

/// The kernel-facing surface a watcher or the metrics collector needs:
/// attach/detach lifecycle plus map access. Lets both be built against a
/// fake in tests instead of a live XDP program.
pub trait XdpHandle: Send + Sync {
    fn attach(&self, idx: InterfaceIndex) -> Result<()>;
    fn detach(&self, idx: InterfaceIndex) -> Result<()>;
    fn force_detach(&self, idx: InterfaceIndex);
    fn stats(&self, idx: InterfaceIndex) -> Result<PacketCounter>;
    fn stats_all(&self) -> Result<HashMap<InterfaceIndex, PacketCounter>>;
    fn drop_config(&self, idx: InterfaceIndex) -> Result<DropConfig>;
    fn drop_all(&self) -> Result<HashMap<InterfaceIndex, DropConfig>>;
    fn drop_update(&self, idx: InterfaceIndex, cfg: DropConfig) -> Result<()>;
    fn close(&self);
}

/// Owns the loaded XDP object image and the set of links attached from
/// it. One instance lives for the daemon's whole lifetime.
pub struct ProgramHandle {
    // Kept alive for as long as any link or map handle derived from it is
    // in use; never read directly once `maps` and `links` exist.
    _object: Object,
    maps: MapClient,
    links: Mutex<HashMap<InterfaceIndex, libbpf_rs::Link>>,
}

impl ProgramHandle {
    /// Loads the XDP object image from `object_path` and opens its map collection.
    /// Does not attach to any interface yet.
    pub fn load(object_path: &std::path::Path) -> Result<Self> {
        let object = ObjectBuilder::default()
            .open_file(object_path)
            .map_err(|e| Error::Attach { index: 0, reason: format!("open object: {e}") })?
            .load()
            .map_err(|e| Error::Attach { index: 0, reason: format!("load object: {e}") })?;

        let stats_map = object
            .maps()
            .find(|m| m.name().to_str() == Ok(STATS_MAP_NAME))
            .ok_or_else(|| Error::Config(format!("map {STATS_MAP_NAME} not found in object")))?;
        let stats_handle = MapHandle::try_from(&stats_map)
            .map_err(|e| Error::Config(format!("opening {STATS_MAP_NAME} handle: {e}")))?;

        let drop_map = object
            .maps()
            .find(|m| m.name().to_str() == Ok(DROP_MAP_NAME))
            .ok_or_else(|| Error::Config(format!("map {DROP_MAP_NAME} not found in object")))?;
        let drop_handle = MapHandle::try_from(&drop_map)
            .map_err(|e| Error::Config(format!("opening {DROP_MAP_NAME} handle: {e}")))?;

        Ok(Self {
            _object: object,
            maps: MapClient::new(stats_handle, drop_handle),
            links: Mutex::new(HashMap::new()),
        })
    }

    /// Attaches XDP (generic mode) to `idx` and inserts zeroed map
    /// entries. Rolls the link back if map insertion fails.
    #[instrument(skip(self), fields(interface = idx))]
    pub fn attach(&self, idx: InterfaceIndex) -> Result<()> {
        let program = self
            ._object
            .progs()
            .find(|p| p.name().to_str() == Ok(PROGRAM_NAME))
            .ok_or_else(|| Error::Config(format!("program {PROGRAM_NAME} not found in object")))?;

        let link = program
            .attach_xdp_with_flags(idx as i32, XdpFlags::SKB_MODE)
            .map_err(|e| Error::Attach { index: idx, reason: e.to_string() })?;

        if let Err(e) = self.maps.stats_put_zero(idx) {
            warn!(error = %e, "rolling back xdp link after stats map insertion failure");
            drop(link);
            return Err(e);
        }
        if let Err(e) = self.maps.drop_put(idx, DropConfig::default()) {
            warn!(error = %e, "rolling back xdp link and stats entry after drop map insertion failure");
            let _ = self.maps.stats_delete(idx);
            drop(link);
            return Err(e);
        }

        self.links.lock().expect("links mutex poisoned").insert(idx, link);
        info!("attached xdp program");
        Ok(())
    }

    /// Removes both map entries and closes the link. Fails if `idx`
    /// isn't attached.
    #[instrument(skip(self), fields(interface = idx))]
    pub fn detach(&self, idx: InterfaceIndex) -> Result<()> {
        self.maps.stats_delete(idx)?;
        self.maps.drop_delete(idx)?;

        let link = self.links.lock().expect("links mutex poisoned").remove(&idx);
        match link {
            Some(link) => {
                drop(link);
                info!("detached xdp program");
                Ok(())
            }
            None => Err(Error::NotAttached(idx)),
        }
    }

    /// Best-effort variant for interfaces that have already disappeared:
    /// ignores per-step errors but still clears bookkeeping.
    #[instrument(skip(self), fields(interface = idx))]
    pub fn force_detach(&self, idx: InterfaceIndex) {
        if let Err(e) = self.maps.stats_delete(idx) {
            warn!(error = %e, "force_detach: stats map entry already gone");
        }
        if let Err(e) = self.maps.drop_delete(idx) {
            warn!(error = %e, "force_detach: drop map entry already gone");
        }
        self.links.lock().expect("links mutex poisoned").remove(&idx);
    }

    fn validate_index(idx: InterfaceIndex) -> Result<()> {
        if idx == 0 {
            return Err(Error::InvalidIndex(0));
        }
        Ok(())
    }

    pub fn stats(&self, idx: InterfaceIndex) -> Result<PacketCounter> {
        Self::validate_index(idx)?;
        self.maps.stats_lookup(idx)
    }

    pub fn stats_all(&self) -> Result<HashMap<InterfaceIndex, PacketCounter>> {
        self.maps.stats_iterate()
    }

    pub fn drop(&self, idx: InterfaceIndex) -> Result<DropConfig> {
        Self::validate_index(idx)?;
        self.maps.drop_lookup(idx)
    }

    pub fn drop_all(&self) -> Result<HashMap<InterfaceIndex, DropConfig>> {
        self.maps.drop_iterate()
    }

    pub fn drop_update(&self, idx: InterfaceIndex, cfg: DropConfig) -> Result<()> {
        Self::validate_index(idx)?;
        self.maps.drop_update_existing(idx, cfg)
    }

    /// Closes every live link. Map handles are released when the handle
    /// (and the underlying object) is dropped.
    pub fn close(&self) {
        let mut links = self.links.lock().expect("links mutex poisoned");
        for (idx, link) in links.drain() {
            info!(interface = idx, "closing xdp link on shutdown");
            drop(link);
        }
    }
}

impl XdpHandle for ProgramHandle {
    fn attach(&self, idx: InterfaceIndex) -> Result<()> {
        self.attach(idx)
    }

    fn detach(&self, idx: InterfaceIndex) -> Result<()> {
        self.detach(idx)
    }

    fn force_detach(&self, idx: InterfaceIndex) {
        self.force_detach(idx)
    }

    fn stats(&self, idx: InterfaceIndex) -> Result<PacketCounter> {
        self.stats(idx)
    }

    fn stats_all(&self) -> Result<HashMap<InterfaceIndex, PacketCounter>> {
        self.stats_all()
    }

    fn drop_config(&self, idx: InterfaceIndex) -> Result<DropConfig> {
        self.drop(idx)
    }

    fn drop_all(&self) -> Result<HashMap<InterfaceIndex, DropConfig>> {
        self.drop_all()
    }

    fn drop_update(&self, idx: InterfaceIndex, cfg: DropConfig) -> Result<()> {
        self.drop_update(idx, cfg)
    }

    fn close(&self) {
        self.close()
    }
}
