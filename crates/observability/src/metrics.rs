//! 投递指标收集模块
//!
//! 路由、sink、notify 与 client 的 Prometheus 指标。

use metrics::{counter, gauge, histogram};

/// 单条路由的投递结果标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcomeLabel {
    /// sink 接收了消息
    Delivered,
    /// sink 拒绝了消息 (队列满或已关闭)
    Rejected,
    /// 过滤器未通过
    FilteredOut,
    /// 过滤器或转换器执行失败
    FilterError,
    /// 路由目标 sink 不在注册表中
    MissingSink,
}

impl RouteOutcomeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Rejected => "rejected",
            Self::FilteredOut => "filtered_out",
            Self::FilterError => "filter_error",
            Self::MissingSink => "missing_sink",
        }
    }
}

/// 记录路由器收到的消息
pub fn record_message_received(topic: &str) {
    counter!(
        "fabric_messages_received_total",
        "topic" => topic.to_string()
    )
    .increment(1);
}

/// 记录单条路由的投递结果
///
/// # Example
///
/// ```ignore
/// use observability::{record_route_outcome, RouteOutcomeLabel};
///
/// record_route_outcome("sink1", RouteOutcomeLabel::Delivered);
/// ```
pub fn record_route_outcome(sink_name: &str, outcome: RouteOutcomeLabel) {
    counter!(
        "fabric_route_outcomes_total",
        "sink" => sink_name.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// 记录路由队列饱和 (入队超时)
pub fn record_router_saturated() {
    counter!("fabric_router_saturated_total").increment(1);
}

/// 记录关闭超时时被丢弃的消息数
pub fn record_router_dropped_on_shutdown(n: u64) {
    counter!("fabric_router_dropped_on_shutdown_total").increment(n);
}

/// 记录 sink 写入结果
pub fn record_sink_write(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "fabric_sink_writes_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录 sink 队列深度
pub fn record_sink_queue_depth(sink_name: &str, depth: usize) {
    gauge!(
        "fabric_sink_queue_depth",
        "sink" => sink_name.to_string()
    )
    .set(depth as f64);
}

/// 记录 notify 通道发送
pub fn record_notify_send(channel: &str, accepted: bool) {
    let status = if accepted { "accepted" } else { "dropped" };
    counter!(
        "fabric_notify_sends_total",
        "channel" => channel.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 记录 client 发送结果与 ack 延迟
pub fn record_client_send(endpoint: &str, success: bool, latency_ms: f64) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "fabric_client_sends_total",
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .increment(1);
    if success {
        histogram!("fabric_client_ack_latency_ms").record(latency_ms);
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }

    /// 合并另一组统计 (Chan 并行算法)
    pub fn merge(&mut self, other: &RunningStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.m2 += other.m2 + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.mean += delta * other.count as f64 / total as f64;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.count = total;
    }

    /// 生成摘要
    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();

        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);
        stats.push(4.0);
        stats.push(5.0);

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let mut left = RunningStats::default();
        let mut right = RunningStats::default();
        let mut all = RunningStats::default();
        for v in [1.0, 2.0, 3.0] {
            left.push(v);
            all.push(v);
        }
        for v in [4.0, 5.0] {
            right.push(v);
            all.push(v);
        }

        left.merge(&right);
        assert_eq!(left.count(), all.count());
        assert!((left.mean() - all.mean()).abs() < 1e-10);
        assert!((left.variance() - all.variance()).abs() < 1e-10);
        assert!((left.max() - 5.0).abs() < 1e-10);

        let mut empty = RunningStats::default();
        empty.merge(&all);
        assert_eq!(empty.count(), 5);
    }

    #[test]
    fn test_summary_display() {
        let empty = StatsSummary::default();
        assert_eq!(format!("{empty}"), "N/A");

        let mut stats = RunningStats::default();
        stats.push(20.0);
        stats.push(80.0);
        let output = format!("{}", stats.summary());
        assert!(output.contains("min=20.000"));
        assert!(output.contains("n=2"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RouteOutcomeLabel::Delivered.as_str(), "delivered");
        assert_eq!(RouteOutcomeLabel::MissingSink.as_str(), "missing_sink");
    }
}
