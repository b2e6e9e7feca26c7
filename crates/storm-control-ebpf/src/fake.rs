//! In-memory [`XdpHandle`] implementation reproducing `ProgramHandle`'s
//! attach/detach/rollback contract without a kernel, for use by watcher
//! and supervisor tests and by this crate's own tests below.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use storm_control_core::{DropConfig, Error, InterfaceIndex, PacketCounter, Result};

use crate::program::XdpHandle;

#[derive(Default)]
pub struct FakeXdpHandle {
    stats: Mutex<HashMap<InterfaceIndex, PacketCounter>>,
    drop_cfg: Mutex<HashMap<InterfaceIndex, DropConfig>>,
    fail_drop_insert: Mutex<HashSet<InterfaceIndex>>,
}

impl FakeXdpHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `attach(idx)` call will insert the stats entry, then
    /// fail as if the drop map insert had failed, exercising the same
    /// rollback path `ProgramHandle::attach` takes.
    pub fn fail_drop_insert_for(&self, idx: InterfaceIndex) {
        self.fail_drop_insert.lock().expect("poisoned").insert(idx);
    }

    pub fn is_attached(&self, idx: InterfaceIndex) -> bool {
        self.stats.lock().expect("poisoned").contains_key(&idx)
    }
}

impl XdpHandle for FakeXdpHandle {
    fn attach(&self, idx: InterfaceIndex) -> Result<()> {
        if idx == 0 {
            return Err(Error::InvalidIndex(0));
        }

        self.stats.lock().expect("poisoned").insert(idx, PacketCounter::default());

        if self.fail_drop_insert.lock().expect("poisoned").remove(&idx) {
            self.stats.lock().expect("poisoned").remove(&idx);
            return Err(Error::Attach { index: idx, reason: "simulated drop map insert failure".into() });
        }

        self.drop_cfg.lock().expect("poisoned").insert(idx, DropConfig::default());
        Ok(())
    }

    fn detach(&self, idx: InterfaceIndex) -> Result<()> {
        let had_stats = self.stats.lock().expect("poisoned").remove(&idx).is_some();
        let had_drop = self.drop_cfg.lock().expect("poisoned").remove(&idx).is_some();
        if had_stats || had_drop {
            Ok(())
        } else {
            Err(Error::NotAttached(idx))
        }
    }

    fn force_detach(&self, idx: InterfaceIndex) {
        self.stats.lock().expect("poisoned").remove(&idx);
        self.drop_cfg.lock().expect("poisoned").remove(&idx);
    }

    fn stats(&self, idx: InterfaceIndex) -> Result<PacketCounter> {
        self.stats.lock().expect("poisoned").get(&idx).copied().ok_or(Error::MapEntryMissing(idx))
    }

    fn stats_all(&self) -> Result<HashMap<InterfaceIndex, PacketCounter>> {
        Ok(self.stats.lock().expect("poisoned").clone())
    }

    fn drop_config(&self, idx: InterfaceIndex) -> Result<DropConfig> {
        self.drop_cfg.lock().expect("poisoned").get(&idx).copied().ok_or(Error::MapEntryMissing(idx))
    }

    fn drop_all(&self) -> Result<HashMap<InterfaceIndex, DropConfig>> {
        Ok(self.drop_cfg.lock().expect("poisoned").clone())
    }

    fn drop_update(&self, idx: InterfaceIndex, cfg: DropConfig) -> Result<()> {
        let mut drop_cfg = self.drop_cfg.lock().expect("poisoned");
        if !drop_cfg.contains_key(&idx) {
            return Err(Error::MapEntryMissing(idx));
        }
        drop_cfg.insert(idx, cfg);
        Ok(())
    }

    fn close(&self) {
        self.stats.lock().expect("poisoned").clear();
        self.drop_cfg.lock().expect("poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_then_detach_leaves_no_entries() {
        let handle = FakeXdpHandle::new();
        handle.attach(7).unwrap();
        assert!(handle.is_attached(7));
        handle.detach(7).unwrap();
        assert!(!handle.is_attached(7));
        assert!(handle.stats(7).is_err());
        assert!(handle.drop_config(7).is_err());
    }

    #[test]
    fn detach_without_attach_is_not_attached_error() {
        let handle = FakeXdpHandle::new();
        assert!(matches!(handle.detach(9), Err(Error::NotAttached(9))));
    }

    #[test]
    fn attach_rolls_back_stats_entry_on_drop_map_failure() {
        let handle = FakeXdpHandle::new();
        handle.fail_drop_insert_for(3);
        assert!(handle.attach(3).is_err());
        assert!(!handle.is_attached(3), "stats entry must be rolled back when drop map insert fails");
        assert!(handle.drop_config(3).is_err());
    }

    #[test]
    fn force_detach_on_unattached_interface_is_a_no_op() {
        let handle = FakeXdpHandle::new();
        handle.force_detach(42);
        assert!(!handle.is_attached(42));
    }

    #[test]
    fn drop_config_round_trips_through_update() {
        let handle = FakeXdpHandle::new();
        handle.attach(5).unwrap();
        let mut cfg = handle.drop_config(5).unwrap();
        cfg.broadcast = true;
        handle.drop_update(5, cfg).unwrap();
        assert_eq!(handle.drop_config(5).unwrap(), cfg);
    }
}
