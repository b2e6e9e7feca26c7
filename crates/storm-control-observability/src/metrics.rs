//! Prometheus metrics: packet counters and drop-config gauges, one
//! series per (interface, traffic class). Implemented as a
//! [`prometheus::core::Collector`] so every series is (re)computed
//! straight from the kernel maps on each scrape, the way the original
//! exporter's `Collect()` does.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{CounterVec, GaugeVec, Opts};
use storm_control_core::{InterfaceTable, TrafficClass};
use storm_control_ebpf::ProgramHandle;
use tracing::warn;

const NAMESPACE: &str = "storm_control";
const INTERFACE_INDEX_LABEL: &str = "interface_index";
const INTERFACE_NAME_LABEL: &str = "interface_name";
const TRAFFIC_TYPE_LABEL: &str = "traffic_type";

const MULTICAST_CLASSES: [(TrafficClass, &str); 3] = [
    (TrafficClass::Ipv4Multicast, "ipv4_multicast"),
    (TrafficClass::Ipv6Multicast, "ipv6_multicast"),
    (TrafficClass::OtherMulticast, "other_multicast"),
];

pub struct StormControlCollector {
    program: Arc<ProgramHandle>,
    interfaces: InterfaceTable,
    broadcast_passed: CounterVec,
    broadcast_dropped: CounterVec,
    multicast_passed_total: CounterVec,
    multicast_dropped_total: CounterVec,
    multicast_passed_by_type: CounterVec,
    multicast_dropped_by_type: CounterVec,
    traffic_blocked_status: GaugeVec,
    attached_links: GaugeVec,
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<CounterVec> {
    CounterVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
}

fn gauge_vec(name: &str, help: &str, labels: &[&str]) -> prometheus::Result<GaugeVec> {
    GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), labels)
}

impl StormControlCollector {
    pub fn new(program: Arc<ProgramHandle>, interfaces: InterfaceTable) -> prometheus::Result<Self> {
        Ok(Self {
            program,
            interfaces,
            broadcast_passed: counter_vec(
                "broadcast_passed_packets",
                "Counter passed broadcast packets by interface",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL],
            )?,
            broadcast_dropped: counter_vec(
                "broadcast_dropped_packets",
                "Counter dropped broadcast packets by interface",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL],
            )?,
            multicast_passed_total: counter_vec(
                "multicast_passed_packets_total",
                "Total passed multicast packets for interface",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL],
            )?,
            multicast_dropped_total: counter_vec(
                "multicast_dropped_packets_total",
                "Total dropped multicast packets for interface",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL],
            )?,
            multicast_passed_by_type: counter_vec(
                "multicast_passed_packets_by_type",
                "Passed multicast packets for interface by traffic type",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL, TRAFFIC_TYPE_LABEL],
            )?,
            multicast_dropped_by_type: counter_vec(
                "multicast_dropped_packets_by_type",
                "Dropped multicast packets for interface by traffic type",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL, TRAFFIC_TYPE_LABEL],
            )?,
            traffic_blocked_status: gauge_vec(
                "traffic_blocked_status",
                "Status of blocked config for specific type of packets (0 unblocked, 1 blocked)",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL, TRAFFIC_TYPE_LABEL],
            )?,
            attached_links: gauge_vec(
                "list_attached_interfaces",
                "List of attached interfaces",
                &[INTERFACE_INDEX_LABEL, INTERFACE_NAME_LABEL],
            )?,
        })
    }

    fn sub_collectors(&self) -> [&dyn Collector; 8] {
        [
            &self.broadcast_passed,
            &self.broadcast_dropped,
            &self.multicast_passed_total,
            &self.multicast_dropped_total,
            &self.multicast_passed_by_type,
            &self.multicast_dropped_by_type,
            &self.traffic_blocked_status,
            &self.attached_links,
        ]
    }

    fn reset(&self) {
        self.broadcast_passed.reset();
        self.broadcast_dropped.reset();
        self.multicast_passed_total.reset();
        self.multicast_dropped_total.reset();
        self.multicast_passed_by_type.reset();
        self.multicast_dropped_by_type.reset();
        self.traffic_blocked_status.reset();
        self.attached_links.reset();
    }

    fn populate(&self) {
        let interfaces = match self.interfaces.read() {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "interface table lock poisoned");
                return;
            }
        };

        let stats = match self.program.stats_all() {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "error collecting xdp statistics");
                return;
            }
        };
        let drop_config = self.program.drop_all().unwrap_or_else(|e| {
            warn!(error = %e, "error collecting drop configuration");
            HashMap::new()
        });

        for (index, counters) in &stats {
            let Some(dev) = interfaces.get(index) else { continue };
            let labels = [index.to_string(), dev.name.clone()];

            self.broadcast_passed.with_label_values(&labels).inc_by(counters.broadcast.passed as f64);
            self.broadcast_dropped.with_label_values(&labels).inc_by(counters.broadcast.dropped as f64);

            let mut passed_total = 0u64;
            let mut dropped_total = 0u64;
            for (class, class_name) in MULTICAST_CLASSES {
                let c = counters.class(class);
                passed_total += c.passed;
                dropped_total += c.dropped;
                self.multicast_passed_by_type
                    .with_label_values(&[&labels[0], &labels[1], class_name])
                    .inc_by(c.passed as f64);
                self.multicast_dropped_by_type
                    .with_label_values(&[&labels[0], &labels[1], class_name])
                    .inc_by(c.dropped as f64);
            }
            self.multicast_passed_total.with_label_values(&labels).inc_by(passed_total as f64);
            self.multicast_dropped_total.with_label_values(&labels).inc_by(dropped_total as f64);

            self.attached_links.with_label_values(&labels).set(1.0);
        }

        for (index, cfg) in &drop_config {
            let Some(dev) = interfaces.get(index) else { continue };
            let labels = [index.to_string(), dev.name.clone()];
            for class in TrafficClass::ALL {
                let value = if cfg.class(class) { 1.0 } else { 0.0 };
                self.traffic_blocked_status.with_label_values(&[&labels[0], &labels[1], class.as_str()]).set(value);
            }
        }
    }
}

impl Collector for StormControlCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.sub_collectors().into_iter().flat_map(Collector::desc).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.reset();
        self.populate();
        self.sub_collectors().into_iter().flat_map(Collector::collect).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_table() -> InterfaceTable {
        Arc::new(RwLock::new(HashMap::new()))
    }

    #[test]
    fn interface_table_starts_empty() {
        let table = empty_table();
        assert!(table.read().unwrap().is_empty());
    }
}
