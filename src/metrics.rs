use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

const SAMPLE_WINDOW: usize = 1000;
const THROUGHPUT_WINDOW_MS: i64 = 60_000;
const TOP_JOB_TYPES: usize = 5;

/// Queue statistics for monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub name: String,
    pub waiting_count: usize,
    pub active_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub delayed_count: usize,
    pub paused: bool,
    pub total_processed: u64,
    pub avg_processing_time_ms: f64,
    pub throughput_per_minute: u64,
    /// Share of failed runs in the sample window, between 0 and 1.
    pub error_rate: f64,
    pub top_job_types: Vec<JobTypeCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTypeCount {
    #[serde(rename = "type")]
    pub job_type: String,
    pub count: u64,
}

#[derive(Debug, Clone)]
struct Sample {
    duration_ms: u64,
    success: bool,
}

#[derive(Debug, Default)]
struct MetricsState {
    samples: VecDeque<Sample>,
    total_processed: u64,
    by_type: HashMap<String, u64>,
    /// Finish times within the throughput window, independent of the sample cap.
    finished: VecDeque<i64>,
}

/// Aggregates derived from processing samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub total_processed: u64,
    pub avg_processing_time_ms: f64,
    pub throughput_per_minute: u64,
    pub error_rate: f64,
    pub top_job_types: Vec<JobTypeCount>,
}

/// Rolling processing-time samples for one queue.
#[derive(Debug, Default)]
pub struct Metrics {
    state: Mutex<MetricsState>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished run, successful or not.
    pub fn record(&self, job_type: &str, duration_ms: u64, success: bool, finished_at: i64) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        if state.samples.len() == SAMPLE_WINDOW {
            state.samples.pop_front();
        }
        state.samples.push_back(Sample {
            duration_ms,
            success,
        });
        state.total_processed += 1;
        *state.by_type.entry(job_type.to_string()).or_insert(0) += 1;

        state.finished.push_back(finished_at);
        let since = finished_at - THROUGHPUT_WINDOW_MS;
        while state.finished.front().is_some_and(|&at| at <= since) {
            state.finished.pop_front();
        }
    }

    pub fn snapshot(&self, now_ms: i64) -> MetricsSnapshot {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let window = state.samples.len();
        let (avg_processing_time_ms, error_rate) = if window == 0 {
            (0.0, 0.0)
        } else {
            let total_ms: u64 = state.samples.iter().map(|s| s.duration_ms).sum();
            let failed = state.samples.iter().filter(|s| !s.success).count();
            (
                total_ms as f64 / window as f64,
                failed as f64 / window as f64,
            )
        };

        let since = now_ms - THROUGHPUT_WINDOW_MS;
        let throughput_per_minute =
            state.finished.iter().filter(|&&at| at > since).count() as u64;

        let mut top_job_types: Vec<JobTypeCount> = state
            .by_type
            .iter()
            .map(|(job_type, count)| JobTypeCount {
                job_type: job_type.clone(),
                count: *count,
            })
            .collect();
        top_job_types.sort_by(|a, b| b.count.cmp(&a.count).then(a.job_type.cmp(&b.job_type)));
        top_job_types.truncate(TOP_JOB_TYPES);

        MetricsSnapshot {
            total_processed: state.total_processed,
            avg_processing_time_ms,
            throughput_per_minute,
            error_rate,
            top_job_types,
        }
    }
}
