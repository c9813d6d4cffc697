//! Service counters for questions, tools, retrieval and extraction
//!
//! Atomic counters for high-frequency events and mutex-protected maps for
//! per-intent, per-tool and per-issue breakdowns. A single process-wide
//! collector is reachable through [`metrics()`].

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Process-wide collector
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_SAMPLES: usize = 1000;

pub struct MetricsCollector {
    // Questions
    questions_received: AtomicU64,
    questions_answered: AtomicU64,
    questions_failed: AtomicU64,
    questions_rejected: AtomicU64,
    canned_answers: AtomicU64,
    tokens_used: AtomicU64,
    last_answer_at: AtomicU64,
    answer_times: Mutex<Vec<u64>>, // milliseconds
    intents: Mutex<HashMap<String, u64>>,

    // Tools
    tool_stats: Mutex<HashMap<String, ToolExecutionStats>>,

    // Documents and retrieval
    documents_ingested: AtomicU64,
    ingest_failures: AtomicU64,
    chunks_stored: AtomicU64,
    retrievals: AtomicU64,
    chunks_retrieved: AtomicU64,

    // Validation
    validation_issues: Mutex<HashMap<String, u64>>,
    validation_retries: AtomicU64,
    disclaimers_added: AtomicU64,

    // Invoice extraction, keyed by method
    extractions: Mutex<HashMap<String, u64>>,
    extraction_warnings: AtomicU64,

    // Lifecycle
    service_state: Mutex<String>,
    uptime_start: AtomicU64,
    health_status: AtomicBool,
    last_health_check: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let now = current_timestamp();
        Self {
            questions_received: AtomicU64::new(0),
            questions_answered: AtomicU64::new(0),
            questions_failed: AtomicU64::new(0),
            questions_rejected: AtomicU64::new(0),
            canned_answers: AtomicU64::new(0),
            tokens_used: AtomicU64::new(0),
            last_answer_at: AtomicU64::new(0),
            answer_times: Mutex::new(Vec::new()),
            intents: Mutex::new(HashMap::new()),
            tool_stats: Mutex::new(HashMap::new()),
            documents_ingested: AtomicU64::new(0),
            ingest_failures: AtomicU64::new(0),
            chunks_stored: AtomicU64::new(0),
            retrievals: AtomicU64::new(0),
            chunks_retrieved: AtomicU64::new(0),
            validation_issues: Mutex::new(HashMap::new()),
            validation_retries: AtomicU64::new(0),
            disclaimers_added: AtomicU64::new(0),
            extractions: Mutex::new(HashMap::new()),
            extraction_warnings: AtomicU64::new(0),
            service_state: Mutex::new("initializing".to_string()),
            uptime_start: AtomicU64::new(now),
            health_status: AtomicBool::new(true),
            last_health_check: AtomicU64::new(now),
        }
    }

    // Question metrics
    pub fn question_received(&self) {
        self.questions_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn question_rejected(&self) {
        self.questions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn question_answered(&self, duration: Duration) {
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
        self.last_answer_at
            .store(current_timestamp(), Ordering::Relaxed);
        self.record_answer_time(duration);
    }

    pub fn question_failed(&self, duration: Duration) {
        self.questions_failed.fetch_add(1, Ordering::Relaxed);
        self.record_answer_time(duration);
    }

    pub fn canned_answer(&self) {
        self.canned_answers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn intent_classified(&self, intent: &str) {
        increment(&self.intents, intent);
    }

    pub fn tokens_consumed(&self, tokens: u32) {
        self.tokens_used
            .fetch_add(u64::from(tokens), Ordering::Relaxed);
    }

    /// Seconds since the last answered question, `None` before the first one
    pub fn seconds_since_last_answer(&self) -> Option<u64> {
        match self.last_answer_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(current_timestamp().saturating_sub(at)),
        }
    }

    fn record_answer_time(&self, duration: Duration) {
        if let Ok(mut times) = self.answer_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Tool execution metrics
    pub fn tool_executed(&self, tool_name: &str, duration: Duration, success: bool) {
        if let Ok(mut stats) = self.tool_stats.lock() {
            let tool_stats = stats
                .entry(tool_name.to_string())
                .or_insert_with(|| ToolExecutionStats::new(tool_name));
            tool_stats.record(duration, success);
        }
    }

    // Document and retrieval metrics
    pub fn document_ingested(&self, chunks: usize) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_stored
            .fetch_add(chunks as u64, Ordering::Relaxed);
    }

    pub fn ingest_failed(&self) {
        self.ingest_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retrieval(&self, chunks: usize) {
        self.retrievals.fetch_add(1, Ordering::Relaxed);
        self.chunks_retrieved
            .fetch_add(chunks as u64, Ordering::Relaxed);
    }

    // Validation metrics
    pub fn validation_issue(&self, kind: &str) {
        increment(&self.validation_issues, kind);
    }

    pub fn validation_retry(&self) {
        self.validation_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disclaimer_added(&self) {
        self.disclaimers_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invoice_extracted(&self, method: &str, warnings: usize) {
        increment(&self.extractions, method);
        self.extraction_warnings
            .fetch_add(warnings as u64, Ordering::Relaxed);
    }

    // Lifecycle metrics
    pub fn set_service_state(&self, state: &str) {
        if let Ok(mut current_state) = self.service_state.lock() {
            *current_state = state.to_string();
        }
    }

    pub fn update_health_status(&self, healthy: bool) {
        self.health_status.store(healthy, Ordering::Relaxed);
        self.last_health_check
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Zero every counter and clear the breakdowns
    pub fn reset(&self) {
        let now = current_timestamp();
        for counter in [
            &self.questions_received,
            &self.questions_answered,
            &self.questions_failed,
            &self.questions_rejected,
            &self.canned_answers,
            &self.tokens_used,
            &self.last_answer_at,
            &self.documents_ingested,
            &self.ingest_failures,
            &self.chunks_stored,
            &self.retrievals,
            &self.chunks_retrieved,
            &self.validation_retries,
            &self.disclaimers_added,
            &self.extraction_warnings,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start.store(now, Ordering::Relaxed);
        self.health_status.store(true, Ordering::Relaxed);
        self.last_health_check.store(now, Ordering::Relaxed);

        if let Ok(mut times) = self.answer_times.lock() {
            times.clear();
        }
        if let Ok(mut intents) = self.intents.lock() {
            intents.clear();
        }
        if let Ok(mut stats) = self.tool_stats.lock() {
            stats.clear();
        }
        if let Ok(mut issues) = self.validation_issues.lock() {
            issues.clear();
        }
        if let Ok(mut extractions) = self.extractions.lock() {
            extractions.clear();
        }
        if let Ok(mut state) = self.service_state.lock() {
            *state = "initializing".to_string();
        }
    }

    /// Average and p50/p95/p99 answer latency
    fn answer_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.answer_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    fn tool_metrics(&self) -> ToolMetrics {
        let Ok(stats) = self.tool_stats.lock() else {
            return ToolMetrics::default();
        };

        let mut metrics = ToolMetrics::default();
        let mut total_time = 0u64;
        let mut total_count = 0u64;

        for (name, stats) in stats.iter() {
            metrics.tool_stats.insert(name.clone(), stats.snapshot());
            metrics.total_executions += stats.executions;
            metrics.total_failures += stats.failures;
            total_time += stats.execution_times.iter().sum::<u64>();
            total_count += stats.execution_times.len() as u64;
        }

        if total_count > 0 {
            metrics.avg_execution_time_ms = total_time as f64 / total_count as f64;
        }
        metrics
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_answer_time_ms, p50, p95, p99) = self.answer_time_statistics();

        MetricsSnapshot {
            questions: QuestionMetrics {
                received: self.questions_received.load(Ordering::Relaxed),
                answered: self.questions_answered.load(Ordering::Relaxed),
                failed: self.questions_failed.load(Ordering::Relaxed),
                rejected: self.questions_rejected.load(Ordering::Relaxed),
                canned_answers: self.canned_answers.load(Ordering::Relaxed),
                tokens_used: self.tokens_used.load(Ordering::Relaxed),
                avg_answer_time_ms,
                answer_time_p50_ms: p50,
                answer_time_p95_ms: p95,
                answer_time_p99_ms: p99,
                by_intent: snapshot_map(&self.intents),
            },
            tools: self.tool_metrics(),
            rag: RagMetrics {
                documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
                ingest_failures: self.ingest_failures.load(Ordering::Relaxed),
                chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
                retrievals: self.retrievals.load(Ordering::Relaxed),
                chunks_retrieved: self.chunks_retrieved.load(Ordering::Relaxed),
            },
            validation: ValidationMetrics {
                issues: snapshot_map(&self.validation_issues),
                retries: self.validation_retries.load(Ordering::Relaxed),
                disclaimers_added: self.disclaimers_added.load(Ordering::Relaxed),
            },
            extraction: ExtractionMetrics {
                by_method: snapshot_map(&self.extractions),
                warnings: self.extraction_warnings.load(Ordering::Relaxed),
            },
            lifecycle: LifecycleMetrics {
                current_state: self
                    .service_state
                    .lock()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
                healthy: self.health_status.load(Ordering::Relaxed),
                last_health_check: self.last_health_check.load(Ordering::Relaxed),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn increment(map: &Mutex<HashMap<String, u64>>, key: &str) {
    if let Ok(mut counts) = map.lock() {
        *counts.entry(key.to_string()).or_insert(0) += 1;
    }
}

fn snapshot_map(map: &Mutex<HashMap<String, u64>>) -> HashMap<String, u64> {
    map.lock().map(|m| m.clone()).unwrap_or_default()
}

/// Running stats for one tool; latencies are kept in milliseconds
#[derive(Debug)]
struct ToolExecutionStats {
    name: String,
    executions: u64,
    failures: u64,
    execution_times: Vec<u64>,
    last_execution: u64,
}

impl ToolExecutionStats {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            executions: 0,
            failures: 0,
            execution_times: Vec::new(),
            last_execution: 0,
        }
    }

    fn record(&mut self, duration: Duration, success: bool) {
        self.executions += 1;
        self.last_execution = current_timestamp();
        self.execution_times.push(duration.as_millis() as u64);
        if self.execution_times.len() > MAX_SAMPLES {
            self.execution_times.remove(0);
        }
        if !success {
            self.failures += 1;
        }
    }

    fn snapshot(&self) -> ToolExecutionStatsSnapshot {
        let avg_execution_time_ms = if self.execution_times.is_empty() {
            0.0
        } else {
            self.execution_times.iter().sum::<u64>() as f64 / self.execution_times.len() as f64
        };

        let success_rate = if self.executions == 0 {
            0.0
        } else {
            (self.executions - self.failures) as f64 / self.executions as f64
        };

        ToolExecutionStatsSnapshot {
            name: self.name.clone(),
            executions: self.executions,
            failures: self.failures,
            avg_execution_time_ms,
            last_execution: self.last_execution,
            success_rate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub questions: QuestionMetrics,
    pub tools: ToolMetrics,
    pub rag: RagMetrics,
    pub validation: ValidationMetrics,
    pub extraction: ExtractionMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct QuestionMetrics {
    pub received: u64,
    pub answered: u64,
    pub failed: u64,
    pub rejected: u64,
    pub canned_answers: u64,
    pub tokens_used: u64,
    pub avg_answer_time_ms: f64,
    pub answer_time_p50_ms: f64,
    pub answer_time_p95_ms: f64,
    pub answer_time_p99_ms: f64,
    pub by_intent: HashMap<String, u64>,
}

#[derive(Debug, Default, Serialize)]
pub struct ToolMetrics {
    pub tool_stats: HashMap<String, ToolExecutionStatsSnapshot>,
    pub total_executions: u64,
    pub total_failures: u64,
    pub avg_execution_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct ToolExecutionStatsSnapshot {
    pub name: String,
    pub executions: u64,
    pub failures: u64,
    pub avg_execution_time_ms: f64,
    pub last_execution: u64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct RagMetrics {
    pub documents_ingested: u64,
    pub ingest_failures: u64,
    pub chunks_stored: u64,
    pub retrievals: u64,
    pub chunks_retrieved: u64,
}

#[derive(Debug, Serialize)]
pub struct ValidationMetrics {
    /// Issue counts keyed by issue kind
    pub issues: HashMap<String, u64>,
    pub retries: u64,
    pub disclaimers_added: u64,
}

#[derive(Debug, Serialize)]
pub struct ExtractionMetrics {
    pub by_method: HashMap<String, u64>,
    pub warnings: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub current_state: String,
    pub uptime_seconds: u64,
    pub healthy: bool,
    pub last_health_check: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
