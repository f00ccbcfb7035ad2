//! Prometheus metric definitions and request timing.
//!
//! All metrics live in a dedicated registry owned by [`Metrics`], which is
//! shared through the application state and rendered by the `/metrics`
//! controller. Request-level observations are recorded by the
//! [`track_requests`] middleware using the matched route as the endpoint
//! label so path parameters do not explode the cardinality.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use prometheus::{
    CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};

use ratus_model::Task;

use super::app_state::AppState;

const LABEL_TOPIC: &str = "topic";
const LABEL_PRODUCER: &str = "producer";
const LABEL_CONSUMER: &str = "consumer";
const LABEL_METHOD: &str = "method";
const LABEL_ENDPOINT: &str = "endpoint";
const LABEL_STATUS_CODE: &str = "status_code";

/// Histogram buckets for request and chore durations, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.01, 0.1, 0.5, 1.0, 2.0, 5.0];

pub struct Metrics {
    registry: Registry,

    /// Request response time in seconds.
    request_duration: HistogramVec,
    /// Periodic background jobs execution time in seconds.
    chore_duration: Histogram,
    /// Task schedule delay in seconds.
    schedule_delay: GaugeVec,
    /// Task execution time in seconds.
    execution_duration: GaugeVec,
    /// Total number of tasks produced.
    produced: CounterVec,
    /// Total number of tasks consumed.
    consumed: CounterVec,
    /// Total number of tasks committed.
    committed: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "ratus_request_duration_seconds",
                "Request response time in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &[LABEL_TOPIC, LABEL_METHOD, LABEL_ENDPOINT, LABEL_STATUS_CODE],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let chore_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ratus_chore_duration_seconds",
                "Periodic background jobs execution time in seconds",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(chore_duration.clone()))?;

        let schedule_delay = GaugeVec::new(
            Opts::new(
                "ratus_task_schedule_delay_seconds",
                "Task schedule delay in seconds",
            ),
            &[LABEL_TOPIC, LABEL_PRODUCER, LABEL_CONSUMER],
        )?;
        registry.register(Box::new(schedule_delay.clone()))?;

        let execution_duration = GaugeVec::new(
            Opts::new(
                "ratus_task_execution_duration_seconds",
                "Task execution time in seconds",
            ),
            &[LABEL_TOPIC, LABEL_PRODUCER, LABEL_CONSUMER],
        )?;
        registry.register(Box::new(execution_duration.clone()))?;

        let produced = CounterVec::new(
            Opts::new(
                "ratus_task_produced_count_total",
                "Total number of tasks produced",
            ),
            &[LABEL_TOPIC, LABEL_PRODUCER],
        )?;
        registry.register(Box::new(produced.clone()))?;

        let consumed = CounterVec::new(
            Opts::new(
                "ratus_task_consumed_count_total",
                "Total number of tasks consumed",
            ),
            &[LABEL_TOPIC, LABEL_PRODUCER, LABEL_CONSUMER],
        )?;
        registry.register(Box::new(consumed.clone()))?;

        let committed = CounterVec::new(
            Opts::new(
                "ratus_task_committed_count_total",
                "Total number of tasks committed",
            ),
            &[LABEL_TOPIC, LABEL_PRODUCER, LABEL_CONSUMER],
        )?;
        registry.register(Box::new(committed.clone()))?;

        Ok(Self {
            registry,
            request_duration,
            chore_duration,
            schedule_delay,
            execution_duration,
            produced,
            consumed,
            committed,
        })
    }

    /// Render all registered metrics in the Prometheus text exposition
    /// format.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| prometheus::Error::Msg(format!("metrics are not valid UTF-8: {e}")))
    }

    pub fn observe_request(
        &self,
        topic: &str,
        method: &str,
        endpoint: &str,
        status_code: u16,
        seconds: f64,
    ) {
        self.request_duration
            .with_label_values(&[topic, method, endpoint, &status_code.to_string()])
            .observe(seconds);
    }

    pub fn observe_chore(&self, seconds: f64) {
        self.chore_duration.observe(seconds);
    }

    /// Record observations for a task that has just been claimed.
    pub fn observe_consumed(&self, t: &Task) {
        if let (Some(scheduled), Some(consumed)) = (t.scheduled, t.consumed) {
            let d = (consumed - scheduled).num_milliseconds() as f64 / 1000.0;
            self.schedule_delay
                .with_label_values(&[&t.topic, &t.producer, &t.consumer])
                .set(d);
        }
        self.consumed
            .with_label_values(&[&t.topic, &t.producer, &t.consumer])
            .inc();
    }

    /// Record observations for a task that has just been committed.
    pub fn observe_committed(&self, t: &Task) {
        if let Some(consumed) = t.consumed {
            let d = (Utc::now() - consumed).num_milliseconds() as f64 / 1000.0;
            self.execution_duration
                .with_label_values(&[&t.topic, &t.producer, &t.consumer])
                .set(d);
        }
        self.committed
            .with_label_values(&[&t.topic, &t.producer, &t.consumer])
            .inc();
    }

    /// Record the number of tasks accepted from a producer.
    pub fn observe_produced(&self, topic: &str, producer: &str, n: i64) {
        if n > 0 {
            self.produced
                .with_label_values(&[topic, producer])
                .inc_by(n as f64);
        }
    }
}

/// Middleware recording a duration observation for every request,
/// including ones that fall through to the 404 handler (those carry an
/// empty endpoint label).
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned())
        .unwrap_or_default();
    let topic = topic_label(request.uri().path()).to_owned();

    let response = next.run(request).await;

    state.metrics.observe_request(
        &topic,
        method.as_str(),
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// The topic path parameter, taken as the segment following `topics`.
fn topic_label(path: &str) -> &str {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(s) = segments.next() {
        if s == "topics" {
            return segments.next().unwrap_or("");
        }
    }
    ""
}
