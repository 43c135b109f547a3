use super::MetricsCollector;

pub struct DeviceMonitor {
    collector: MetricsCollector,
}

impl DeviceMonitor {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No devices registered".to_string();
        }

        let mut report = String::from("=== Device IO Metrics ===\n");

        for (device_id, metrics) in snapshot.iter() {
            report.push_str(&format!(
                "\n[{} {}]\n  Cycles: {} completed, {} dropped\n  Faults: {}\n  Drain timeouts: {}\n  Teardowns: {}\n  Avg Cycle: {}μs\n",
                device_id,
                metrics.device_name,
                metrics.cycles,
                metrics.dropped_cycles,
                metrics.faults,
                metrics.drain_timeouts,
                metrics.teardowns,
                metrics.avg_cycle_us
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
