/*!
 * Structured Tracing
 * Spawn-scoped spans and mount timing using the tracing crate
 *
 * Features:
 * - Trace ID per spawn for correlating every mount of one app
 * - JSON-formatted logs for structured parsing
 * - `log` records from the engine modules bridged into tracing
 * - Slow mount detection
 */

use crate::core::limits::SLOW_MOUNT_THRESHOLD;
use crate::core::types::Uid;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SANDBOX_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SANDBOX_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::FULL),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_file(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        info!(json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique trace ID for spawn correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one sandbox construction
pub struct SpawnSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl SpawnSpan {
    pub fn new(bundle_name: &str, uid: Uid) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::INFO,
            "sandbox_spawn",
            trace_id = %trace_id,
            bundle = bundle_name,
            uid = uid,
            mounts = tracing::field::Empty,
            result = tracing::field::Empty,
            error = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_mounts(&self, count: usize) {
        self.span.record("mounts", count);
    }

    pub fn record_result(&self, success: bool) {
        self.span.record("result", if success { "success" } else { "error" });
    }

    pub fn record_error(&self, error: &str) {
        self.span.record("error", error);
        self.span.record("result", "error");
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for SpawnSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        let _entered = self.span.enter();
        debug!(trace_id = %self.trace_id, duration_us = duration.as_micros() as u64, "sandbox spawn finished");
    }
}

/// Times one mount and reports it when slow
pub struct MountTimer<'a> {
    target: &'a str,
    start: Instant,
}

impl<'a> MountTimer<'a> {
    pub fn start(target: &'a str) -> Self {
        Self {
            target,
            start: Instant::now(),
        }
    }

    /// Stop the timer; returns the elapsed time
    pub fn finish(self) -> Duration {
        let elapsed = self.start.elapsed();
        if elapsed >= SLOW_MOUNT_THRESHOLD {
            warn!(
                target_path = self.target,
                duration_us = elapsed.as_micros() as u64,
                slow = true,
                "slow mount detected"
            );
        }
        elapsed
    }
}

/// Helper to create a spawn span
#[inline]
pub fn spawn_span(bundle_name: &str, uid: Uid) -> SpawnSpan {
    SpawnSpan::new(bundle_name, uid)
}
