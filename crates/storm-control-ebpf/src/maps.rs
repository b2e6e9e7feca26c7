//! Typed access to the two kernel-resident maps: `intf_stats` (per-CPU
//! hash, stats) and `drop_intf` (hash, drop configuration).

use std::collections::HashMap;

use bytemuck::Zeroable;
use libbpf_rs::{MapFlags, MapHandle};
use storm_control_core::{DropConfig, Error, InterfaceIndex, PacketCounter, Result};

use crate::wire::{RawDropConfig, RawPacketCounter};

pub struct MapClient {
    stats_map: MapHandle,
    drop_map: MapHandle,
}

fn map_error(operation: &'static str, index: InterfaceIndex, err: libbpf_rs::Error) -> Error {
    Error::Map { operation, index, source: std::io::Error::from(err) }
}

fn num_possible_cpus() -> usize {
    libbpf_rs::num_possible_cpus().unwrap_or(1)
}

impl MapClient {
    pub fn new(stats_map: MapHandle, drop_map: MapHandle) -> Self {
        Self { stats_map, drop_map }
    }

    /// Reads the per-CPU slice for `idx` and sums the four counter pairs
    /// across CPUs.
    pub fn stats_lookup(&self, idx: InterfaceIndex) -> Result<PacketCounter> {
        let key = idx.to_ne_bytes();
        let per_cpu = self
            .stats_map
            .lookup_percpu(&key, MapFlags::ANY)
            .map_err(|e| map_error("stats_lookup", idx, e))?
            .ok_or(Error::MapEntryMissing(idx))?;

        let values: Vec<RawPacketCounter> =
            per_cpu.iter().map(|bytes| *bytemuck::from_bytes(bytes)).collect();
        Ok(RawPacketCounter::aggregate(&values))
    }

    /// Enumerates all entries, aggregating each.
    pub fn stats_iterate(&self) -> Result<HashMap<InterfaceIndex, PacketCounter>> {
        let mut result = HashMap::new();
        for key_bytes in self.stats_map.keys() {
            let idx = InterfaceIndex::from_ne_bytes(
                key_bytes.as_slice().try_into().map_err(|_| Error::InvalidIndex(-1))?,
            );
            result.insert(idx, self.stats_lookup(idx)?);
        }
        Ok(result)
    }

    pub fn drop_lookup(&self, idx: InterfaceIndex) -> Result<DropConfig> {
        let key = idx.to_ne_bytes();
        let bytes = self
            .drop_map
            .lookup(&key, MapFlags::ANY)
            .map_err(|e| map_error("drop_lookup", idx, e))?
            .ok_or(Error::MapEntryMissing(idx))?;
        let raw: RawDropConfig = *bytemuck::from_bytes(&bytes);
        Ok(raw.into())
    }

    pub fn drop_iterate(&self) -> Result<HashMap<InterfaceIndex, DropConfig>> {
        let mut result = HashMap::new();
        for key_bytes in self.drop_map.keys() {
            let idx = InterfaceIndex::from_ne_bytes(
                key_bytes.as_slice().try_into().map_err(|_| Error::InvalidIndex(-1))?,
            );
            result.insert(idx, self.drop_lookup(idx)?);
        }
        Ok(result)
    }

    /// Inserts a new zeroed per-CPU stats entry, required on attach.
    pub fn stats_put_zero(&self, idx: InterfaceIndex) -> Result<()> {
        let key = idx.to_ne_bytes();
        let zero = RawPacketCounter::zeroed();
        let per_cpu_value: Vec<u8> =
            std::iter::repeat(bytemuck::bytes_of(&zero)).take(num_possible_cpus()).flatten().copied().collect();
        self.stats_map
            .update_percpu(&key, &per_cpu_value, MapFlags::ANY)
            .map_err(|e| map_error("stats_put_zero", idx, e))
    }

    pub fn drop_put(&self, idx: InterfaceIndex, cfg: DropConfig) -> Result<()> {
        let key = idx.to_ne_bytes();
        let raw: RawDropConfig = cfg.into();
        self.drop_map
            .update(&key, bytemuck::bytes_of(&raw), MapFlags::ANY)
            .map_err(|e| map_error("drop_put", idx, e))
    }

    /// Fails if the key is absent.
    pub fn drop_update_existing(&self, idx: InterfaceIndex, cfg: DropConfig) -> Result<()> {
        let key = idx.to_ne_bytes();
        let raw: RawDropConfig = cfg.into();
        self.drop_map
            .update(&key, bytemuck::bytes_of(&raw), MapFlags::EXIST)
            .map_err(|e| map_error("drop_update_existing", idx, e))
    }

    pub fn stats_delete(&self, idx: InterfaceIndex) -> Result<()> {
        let key = idx.to_ne_bytes();
        self.stats_map.delete(&key).map_err(|e| map_error("stats_delete", idx, e))
    }

    pub fn drop_delete(&self, idx: InterfaceIndex) -> Result<()> {
        let key = idx.to_ne_bytes();
        self.drop_map.delete(&key).map_err(|e| map_error("drop_delete", idx, e))
    }
}
