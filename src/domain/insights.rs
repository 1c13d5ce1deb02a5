//! Statistics over the recorded [`Metrics`](Metric)
//!
//! Everything is recomputed from the full metric set on every request. Nothing is kept between
//! two computations.

use super::metrics::Metric;
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

const P75: f64 = 0.75;
const P99: f64 = 0.99;

/// Outcome counts of either publishes or consumes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    /// Number of operations
    pub total: u64,
    /// Successful operations
    pub success: u64,
    /// Failed operations
    pub error: u64,
    /// Share of successful operations like `"66.67%"`, absent without operations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_percentage: Option<String>,
}

impl Totals {
    fn record(&mut self, ack: bool) {
        self.total += 1;

        if ack {
            self.success += 1;
        } else {
            self.error += 1;
        }
    }

    fn finish(&mut self) {
        self.success_percentage = if self.total == 0 {
            None
        } else {
            Some(format!(
                "{:.2}%",
                self.success as f64 * 100.0 / self.total as f64
            ))
        };
    }
}

/// Latency percentiles in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Percentiles {
    #[allow(missing_docs)]
    pub p75: i64,
    #[allow(missing_docs)]
    pub p99: i64,
}

/// Number of operations that ended within one minute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpmBucket {
    /// Start of the minute
    pub minute: DateTime<Utc>,
    #[allow(missing_docs)]
    pub count: u64,
}

/// Point in time view on the broker throughput
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Insights {
    /// Publish outcomes
    pub published: Totals,
    /// Consume outcomes
    pub consumed: Totals,
    /// Publishes per topic
    pub published_by_topic: BTreeMap<String, u64>,
    /// Consumes per consumer group
    pub consumed_by_consumer: BTreeMap<String, u64>,
    /// Consumes per `topic.consumer`
    pub consumed_by_subscription: BTreeMap<String, u64>,
    /// Latency per topic for publishes and per `topic.consumer` for consumes
    pub latency: BTreeMap<String, Percentiles>,
    /// Requests per minute, keyed like [`Insights::latency`]
    pub rpm: BTreeMap<String, Vec<RpmBucket>>,
}

impl Insights {
    /// Aggregates a set of metrics
    pub fn compute(metrics: &[Metric]) -> Self {
        let mut ordered: Vec<&Metric> = metrics.iter().collect();
        ordered.sort_by_key(|metric| metric.time_ended);

        let mut insights = Insights::default();
        let mut samples: BTreeMap<String, Vec<i64>> = BTreeMap::new();

        for metric in ordered {
            let key = if metric.is_publish() {
                insights.published.record(metric.ack);
                *insights
                    .published_by_topic
                    .entry(metric.topic_name.clone())
                    .or_default() += 1;

                metric.topic_name.clone()
            } else {
                let key = format!("{}.{}", metric.topic_name, metric.consumer_name);

                insights.consumed.record(metric.ack);
                *insights
                    .consumed_by_consumer
                    .entry(metric.consumer_name.clone())
                    .or_default() += 1;
                *insights
                    .consumed_by_subscription
                    .entry(key.clone())
                    .or_default() += 1;

                key
            };

            samples
                .entry(key.clone())
                .or_default()
                .push(metric.duration_ms);
            push_rpm(insights.rpm.entry(key).or_default(), metric.time_ended);
        }

        insights.published.finish();
        insights.consumed.finish();

        for (key, durations) in samples {
            if let (Some(p75), Some(p99)) = (percentile(&durations, P75), percentile(&durations, P99)) {
                insights.latency.insert(key, Percentiles { p75, p99 });
            }
        }

        insights
    }
}

/// Exact percentile of a sample set, `None` if it is empty
///
/// The samples are sorted ascending and the value at `ceil(p * n) - 1`, clamped to the valid
/// index range, is returned.
pub fn percentile(samples: &[i64], p: f64) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_unstable();

    let rank = (p * sorted.len() as f64).ceil();
    let index = if rank < 1.0 { 0 } else { rank as usize - 1 };

    sorted.get(index.min(sorted.len() - 1)).copied()
}

/// Counts an operation into the series. A new bucket is appended whenever the minute differs
/// from the last bucket, so timestamps have to arrive in non-decreasing order.
pub fn push_rpm(series: &mut Vec<RpmBucket>, at: DateTime<Utc>) {
    let minute = truncate_to_minute(at);

    match series.last_mut() {
        Some(bucket) if bucket.minute == minute => bucket.count += 1,
        _ => series.push(RpmBucket { minute, count: 1 }),
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|at| at.with_nanosecond(0))
        .unwrap_or(at)
}
