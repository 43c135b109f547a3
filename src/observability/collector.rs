use super::DeviceMetrics;
use crate::core::ObjectId;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub device_name: String,
    pub cycles: u64,
    pub dropped_cycles: u64,
    pub faults: u64,
    pub drain_timeouts: u64,
    pub teardowns: u64,
    pub avg_cycle_us: u64,
}

#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<ObjectId, Arc<DeviceMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, device: ObjectId, metrics: Arc<DeviceMetrics>) {
        self.metrics.insert(device, metrics);
    }

    pub fn unregister(&mut self, device: ObjectId) -> Option<Arc<DeviceMetrics>> {
        self.metrics.remove(&device)
    }

    pub fn snapshot(&self) -> BTreeMap<ObjectId, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(id, metrics)| {
                (
                    *id,
                    MetricsSnapshot {
                        device_name: metrics.device_name().to_string(),
                        cycles: metrics.cycles(),
                        dropped_cycles: metrics.dropped_cycles(),
                        faults: metrics.faults(),
                        drain_timeouts: metrics.drain_timeouts(),
                        teardowns: metrics.teardowns(),
                        avg_cycle_us: metrics.avg_cycle_us(),
                    },
                )
            })
            .collect()
    }

    pub fn get_device_metrics(&self, device: ObjectId) -> Option<Arc<DeviceMetrics>> {
        self.metrics.get(&device).cloned()
    }
}
