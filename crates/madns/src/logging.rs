use std::fs::File;

use anyhow::Context;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    filter::filter_fn, fmt::layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

pub const LOGGING_ENV: &str = "MADNS_LOG";
/// Path of an optional log file
pub const LOGGING_FILE_ENV: &str = "MADNS_LOG_FILE";
pub const LOGGING_FILE_LEVEL_ENV: &str = "MADNS_LOG_FILE_LEVEL";

pub fn setup_logging() -> anyhow::Result<()> {
    let file_layer = match std::env::var_os(LOGGING_FILE_ENV) {
        Some(path) => {
            let log_file = File::options()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open the log file {:?}", path))?;

            Some(
                layer()
                    .pretty()
                    .with_writer(log_file)
                    .with_ansi(false)
                    .with_filter(
                        EnvFilter::builder()
                            .with_env_var(LOGGING_FILE_LEVEL_ENV)
                            .with_default_directive(LevelFilter::TRACE.into())
                            .from_env_lossy(),
                    ),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            layer()
                .with_filter(LevelFilter::INFO)
                .and_then(
                    layer()
                        .with_line_number(true)
                        .with_file(true)
                        .with_filter(filter_fn(|metadata| metadata.level() > &LevelFilter::INFO)),
                )
                .with_filter(
                    EnvFilter::builder()
                        .with_env_var(LOGGING_ENV)
                        .with_default_directive(LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .with(file_layer)
        .try_init()
        .context("failed to initialize tracing_subscriber")
}
