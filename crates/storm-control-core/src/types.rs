//! Data model shared between the eBPF map layer and the watcher layer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// The kernel's numeric interface identifier. Used as the key in both
/// kernel maps.
pub type InterfaceIndex = u32;

/// One of the four traffic classes the XDP data plane classifies and
/// the control plane independently blocks/unblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficClass {
    Broadcast,
    Ipv4Multicast,
    Ipv6Multicast,
    OtherMulticast,
}

impl TrafficClass {
    /// All four classes, in the order the kernel's `DropConfig` bytes
    /// are laid out.
    pub const ALL: [TrafficClass; 4] = [
        TrafficClass::Broadcast,
        TrafficClass::Ipv4Multicast,
        TrafficClass::Ipv6Multicast,
        TrafficClass::OtherMulticast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::Broadcast => "broadcast",
            TrafficClass::Ipv4Multicast => "ipv4_multicast",
            TrafficClass::Ipv6Multicast => "ipv6_multicast",
            TrafficClass::OtherMulticast => "other_multicast",
        }
    }
}

impl std::fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passed/dropped counters for one (interface, class) pair. Monotonically
/// non-decreasing while the interface is attached; reset to zero on
/// re-attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub passed: u64,
    pub dropped: u64,
}

impl TrafficCounters {
    /// Unsigned modular subtraction, tolerant of counter wraparound
    /// within a sampling window.
    pub fn delta(&self, previous: &TrafficCounters) -> TrafficCounters {
        TrafficCounters {
            passed: self.passed.wrapping_sub(previous.passed),
            dropped: self.dropped.wrapping_sub(previous.dropped),
        }
    }
}

/// One interface's counters for all four traffic classes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketCounter {
    pub broadcast: TrafficCounters,
    pub ipv4_multicast: TrafficCounters,
    pub ipv6_multicast: TrafficCounters,
    pub other_multicast: TrafficCounters,
}

impl PacketCounter {
    pub fn class(&self, class: TrafficClass) -> TrafficCounters {
        match class {
            TrafficClass::Broadcast => self.broadcast,
            TrafficClass::Ipv4Multicast => self.ipv4_multicast,
            TrafficClass::Ipv6Multicast => self.ipv6_multicast,
            TrafficClass::OtherMulticast => self.other_multicast,
        }
    }

    pub fn class_mut(&mut self, class: TrafficClass) -> &mut TrafficCounters {
        match class {
            TrafficClass::Broadcast => &mut self.broadcast,
            TrafficClass::Ipv4Multicast => &mut self.ipv4_multicast,
            TrafficClass::Ipv6Multicast => &mut self.ipv6_multicast,
            TrafficClass::OtherMulticast => &mut self.other_multicast,
        }
    }
}

/// Per-interface drop flags, one boolean-valued byte per class. `false`
/// (0) = pass, `true` (1) = block. The kernel consumes this; the control
/// plane writes it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropConfig {
    pub broadcast: bool,
    pub ipv4_multicast: bool,
    pub ipv6_multicast: bool,
    pub other_multicast: bool,
}

impl DropConfig {
    pub fn class(&self, class: TrafficClass) -> bool {
        match class {
            TrafficClass::Broadcast => self.broadcast,
            TrafficClass::Ipv4Multicast => self.ipv4_multicast,
            TrafficClass::Ipv6Multicast => self.ipv6_multicast,
            TrafficClass::OtherMulticast => self.other_multicast,
        }
    }

    pub fn set_class(&mut self, class: TrafficClass, blocked: bool) {
        match class {
            TrafficClass::Broadcast => self.broadcast = blocked,
            TrafficClass::Ipv4Multicast => self.ipv4_multicast = blocked,
            TrafficClass::Ipv6Multicast => self.ipv6_multicast = blocked,
            TrafficClass::OtherMulticast => self.other_multicast = blocked,
        }
    }
}

/// A host network interface as returned by discovery: just enough to
/// match against configuration and key the kernel maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub index: InterfaceIndex,
    pub name: String,
}

impl InterfaceInfo {
    /// `"<name> (<index>)"`, the interface-info string used in every log
    /// line that touches a specific interface.
    pub fn describe(&self) -> String {
        format!("{} ({})", self.name, self.index)
    }
}

/// Interfaces currently known to the supervisor, shared with the
/// metrics collector so it never needs its own (async) netlink call
/// from inside a synchronous Prometheus scrape.
pub type InterfaceTable = Arc<RwLock<HashMap<InterfaceIndex, InterfaceInfo>>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_wrapping() {
        let prev = TrafficCounters { passed: u64::MAX - 1, dropped: 0 };
        let cur = TrafficCounters { passed: 1, dropped: 0 };
        let delta = cur.delta(&prev);
        assert_eq!(delta.passed, 3);
    }

    #[test]
    fn drop_config_round_trips_per_class() {
        let mut cfg = DropConfig::default();
        cfg.set_class(TrafficClass::Ipv6Multicast, true);
        assert!(cfg.class(TrafficClass::Ipv6Multicast));
        assert!(!cfg.class(TrafficClass::Broadcast));
    }

    #[test]
    fn describe_formats_name_and_index() {
        let info = InterfaceInfo { index: 5, name: "tap5".into() };
        assert_eq!(info.describe(), "tap5 (5)");
    }
}
