use crate::config::LoggingConfig;
use std::fs::{File, OpenOptions};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Level from `-v` flags, falling back to the configured level
pub fn effective_level(config: &LoggingConfig, cli_verbose: u8) -> &str {
    match cli_verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

/// `RUST_LOG` when set, otherwise `tessera=<level>` plus per-module directives
pub fn build_filter(config: &LoggingConfig, cli_verbose: u8) -> anyhow::Result<EnvFilter> {
    let log_level = effective_level(config, cli_verbose);
    let mut filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| format!("tessera={}", log_level)));

    for (module, level) in &config.module_filters {
        filter = filter.add_directive(format!("{}={}", module, level).parse()?);
    }
    Ok(filter)
}

fn open_log_file(config: &LoggingConfig) -> anyhow::Result<Option<File>> {
    match &config.file_output {
        Some(path) => Ok(Some(OpenOptions::new().create(true).append(true).open(path)?)),
        None => Ok(None),
    }
}

/// Initialize the global subscriber from configuration
pub fn init_logging(config: &LoggingConfig, cli_verbose: u8) -> anyhow::Result<()> {
    let log_level = effective_level(config, cli_verbose);
    let subscriber = tracing_subscriber::registry().with(build_filter(config, cli_verbose)?);
    let file = open_log_file(config)?;

    match config.format.as_str() {
        "json" => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true);

            let file_layer = file.map(|f| fmt::layer().json().with_writer(f).with_ansi(false));
            subscriber.with(json_layer).with(file_layer).try_init()?;
        }
        "compact" => {
            let compact_layer = fmt::layer()
                .compact()
                .with_target(false)
                .with_thread_ids(false)
                .with_line_number(false)
                .with_file(false);

            let file_layer = file.map(|f| fmt::layer().compact().with_writer(f).with_ansi(false));
            subscriber.with(compact_layer).with(file_layer).try_init()?;
        }
        _ => {
            // Source locations only at debug and trace
            let show_location = matches!(log_level, "debug" | "trace");

            let pretty_layer = fmt::layer()
                .with_target(show_location)
                .with_thread_ids(false)
                .with_line_number(show_location)
                .with_file(show_location);

            let file_layer = file.map(|f| fmt::layer().with_writer(f).with_ansi(false));
            subscriber.with(pretty_layer).with(file_layer).try_init()?;
        }
    }
    Ok(())
}
