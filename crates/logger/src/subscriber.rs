use std::env::{VarError, var};

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Install the global subscriber at `info`, honouring `RUST_LOG` and `RUST_LOG_FORMAT`.
///
/// Panics if a global subscriber is already set; use [`try_init`] where that can happen.
pub fn init() {
    build_subscriber(LevelFilter::INFO).init();
}

/// Like [`init`], but returns `false` instead of panicking when a subscriber already exists.
pub fn try_init() -> bool {
    build_subscriber(LevelFilter::INFO).try_init().is_ok()
}

fn build_subscriber(level: LevelFilter) -> impl SubscriberInitExt {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = match var("RUST_LOG_FORMAT") {
        Ok(format) => format,
        Err(VarError::NotPresent) => String::new(),
        Err(error) => {
            warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}");
            String::new()
        }
    };

    let log_layer: Box<dyn Layer<Registry> + Send + Sync> = match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(false)
            .with_filter(env_filter)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer)
}
