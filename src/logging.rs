use std::io;
/// Structured logging utilities for vauban
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// Initialize structured logging with optional JSON output.
///
/// `RUST_LOG` wins over `default_directive` when set.
pub fn init_logging(json_output: bool, default_directive: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = Registry::default().with(env_filter);

    if json_output {
        // JSON output for log aggregation in the cluster
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(io::stderr)
                    .with_target(false)
                    .with_span_events(FmtSpan::NONE),
            )
            .try_init()?;
    }

    Ok(())
}

/// Default filter directive for a given verbosity
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "vauban=debug,tower_http=debug"
    } else {
        "vauban=info,tower_http=info"
    }
}

#[macro_export]
macro_rules! log_stage_start {
    ($image:expr, $stage:expr) => {
        tracing::info!(image = %$image, stage = %$stage, "Stage started");
    };
}

#[macro_export]
macro_rules! log_stage_skipped {
    ($image:expr, $stage:expr) => {
        tracing::warn!(image = %$image, stage = %$stage, "Nothing to do, stage skipped");
    };
}

#[macro_export]
macro_rules! log_media_verify_fail {
    ($file:expr, $expected:expr, $actual:expr) => {
        tracing::error!(
            file = %$file,
            expected = %$expected.chars().take(16).collect::<String>(),
            actual = %$actual.chars().take(16).collect::<String>(),
            "Medium checksum verification failed"
        );
    };
}

#[macro_export]
macro_rules! log_job_transition {
    ($job_id:expr, $from:expr, $to:expr) => {
        tracing::info!(job_id = %$job_id, from = %$from, to = %$to, "Job state changed");
    };
}

#[macro_export]
macro_rules! log_platform_retry {
    ($operation:expr, $attempt:expr, $error:expr) => {
        tracing::debug!(
            operation = $operation,
            attempt = $attempt,
            error = %$error,
            "Platform call failed, retrying"
        );
    };
}
