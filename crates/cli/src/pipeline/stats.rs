//! Fabric statistics.

use std::collections::BTreeMap;
use std::time::Duration;

use router::RouterStats;

/// Statistics from a fabric run
#[derive(Debug, Clone, Default)]
pub struct FabricStats {
    pub router: RouterStats,
    /// Sink name -> stat line
    pub sinks: BTreeMap<String, String>,
    /// Notify channel name -> stat line
    pub notify: BTreeMap<String, String>,
    /// Successful config reloads
    pub reloads: u64,
    pub duration: Duration,
}

impl FabricStats {
    /// Messages received per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.router.received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Share of route evaluations that ended in a drop, as percentage
    pub fn drop_rate(&self) -> f64 {
        let r = &self.router;
        let dropped = r.rejected + r.filter_errors + r.missing_sink;
        let total = dropped + r.delivered + r.filtered_out;
        if total > 0 {
            (dropped as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        let r = &self.router;
        println!("\n=== Fabric Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Received: {}", r.received);
        println!("   ├─ Throughput: {:.2} msg/s", self.throughput());
        println!("   └─ Config reloads: {}", self.reloads);

        println!("\nRouting");
        println!("   ├─ Routed: {}", r.routed);
        println!("   ├─ Unrouted: {}", r.unrouted);
        println!("   ├─ Delivered: {}", r.delivered);
        println!("   ├─ Filtered out: {}", r.filtered_out);
        println!("   ├─ Rejected by sink: {}", r.rejected);
        println!("   ├─ Filter errors: {}", r.filter_errors);
        println!("   ├─ Missing sink: {}", r.missing_sink);
        println!("   ├─ Saturated: {}", r.saturated);
        println!("   ├─ Dropped on shutdown: {}", r.dropped_on_shutdown);
        println!("   └─ Drop rate: {:.2}%", self.drop_rate());

        if !r.per_topic.is_empty() {
            println!("\nTopics");
            print_tree(r.per_topic.iter().map(|(topic, n)| (topic, n.to_string())));
        }
        if !self.sinks.is_empty() {
            println!("\nSinks");
            print_tree(self.sinks.iter().map(|(k, v)| (k, v.clone())));
        }
        if !self.notify.is_empty() {
            println!("\nNotify channels");
            print_tree(self.notify.iter().map(|(k, v)| (k, v.clone())));
        }
        println!();
    }
}

fn print_tree<'a>(entries: impl ExactSizeIterator<Item = (&'a String, String)>) {
    let last = entries.len().saturating_sub(1);
    for (i, (name, value)) in entries.enumerate() {
        let prefix = if i == last { "└─" } else { "├─" };
        println!("   {} {}: {}", prefix, name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_rate() {
        let stats = FabricStats {
            router: RouterStats {
                delivered: 6,
                filtered_out: 2,
                missing_sink: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!((stats.drop_rate() - 20.0).abs() < f64::EPSILON);
        assert_eq!(FabricStats::default().drop_rate(), 0.0);
        assert_eq!(FabricStats::default().throughput(), 0.0);
    }
}
