//! Byte-for-byte layout of the values the kernel program reads and
//! writes. These mirror the C structs embedded in the XDP object image
//! (`struct packet_counter` / the four `u8` fields of `drop_intf`); the
//! kernel side is an external artifact we only consume (see spec §1).

use bytemuck::{Pod, Zeroable};
use storm_control_core::{DropConfig, PacketCounter, TrafficCounters};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RawTrafficCounters {
    pub passed: u64,
    pub dropped: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RawPacketCounter {
    pub broadcast: RawTrafficCounters,
    pub ipv4_multicast: RawTrafficCounters,
    pub ipv6_multicast: RawTrafficCounters,
    pub other_multicast: RawTrafficCounters,
}

impl RawPacketCounter {
    /// Sums each field across a per-CPU slice. Summation wraps, matching
    /// the kernel counters it mirrors (spec §4.1: "on counter wrap within
    /// a CPU slice, the summed value wraps too").
    pub fn aggregate(per_cpu: &[RawPacketCounter]) -> PacketCounter {
        let mut total = PacketCounter::default();
        for cpu in per_cpu {
            total.broadcast = add(total.broadcast, cpu.broadcast);
            total.ipv4_multicast = add(total.ipv4_multicast, cpu.ipv4_multicast);
            total.ipv6_multicast = add(total.ipv6_multicast, cpu.ipv6_multicast);
            total.other_multicast = add(total.other_multicast, cpu.other_multicast);
        }
        total
    }
}

fn add(acc: TrafficCounters, raw: RawTrafficCounters) -> TrafficCounters {
    TrafficCounters {
        passed: acc.passed.wrapping_add(raw.passed),
        dropped: acc.dropped.wrapping_add(raw.dropped),
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct RawDropConfig {
    pub broadcast: u8,
    pub ipv4_multicast: u8,
    pub ipv6_multicast: u8,
    pub other_multicast: u8,
}

impl From<DropConfig> for RawDropConfig {
    fn from(cfg: DropConfig) -> Self {
        RawDropConfig {
            broadcast: cfg.broadcast as u8,
            ipv4_multicast: cfg.ipv4_multicast as u8,
            ipv6_multicast: cfg.ipv6_multicast as u8,
            other_multicast: cfg.other_multicast as u8,
        }
    }
}

impl From<RawDropConfig> for DropConfig {
    fn from(raw: RawDropConfig) -> Self {
        DropConfig {
            broadcast: raw.broadcast != 0,
            ipv4_multicast: raw.ipv4_multicast != 0,
            ipv6_multicast: raw.ipv6_multicast != 0,
            other_multicast: raw.other_multicast != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_sums_across_cpus() {
        let per_cpu = vec![
            RawPacketCounter {
                broadcast: RawTrafficCounters { passed: 10, dropped: 1 },
                ..Zeroable::zeroed()
            },
            RawPacketCounter {
                broadcast: RawTrafficCounters { passed: 5, dropped: 2 },
                ..Zeroable::zeroed()
            },
        ];
        let total = RawPacketCounter::aggregate(&per_cpu);
        assert_eq!(total.broadcast.passed, 15);
        assert_eq!(total.broadcast.dropped, 3);
    }

    #[test]
    fn drop_config_byte_round_trip() {
        let cfg = DropConfig { broadcast: true, ipv4_multicast: false, ipv6_multicast: true, other_multicast: false };
        let raw: RawDropConfig = cfg.into();
        let back: DropConfig = raw.into();
        assert_eq!(cfg, back);
    }
}
