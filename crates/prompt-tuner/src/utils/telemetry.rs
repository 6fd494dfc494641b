use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

const DEFAULT_FILTER: &str = "prompt_tuner=debug";
static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("invalid tracing filter directive `{directive}`: {source}")]
    InvalidFilter {
        directive: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SetGlobalDefault(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Installs pretty, process-global tracing output.
///
/// Filtered by `RUST_LOG`, or `prompt_tuner=debug` when it is unset or
/// unparsable. Closing `tuner.*` spans report their duration, which is how a
/// whole `optimize` call gets timed. Only the first successful call installs
/// anything.
pub fn init_tracing() -> Result<(), TelemetryInitError> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| parse_filter(DEFAULT_FILTER))?;
    install(filter)
}

/// Like [`init_tracing`], but ignores `RUST_LOG` in favor of `directive`.
pub fn init_tracing_with_filter(directive: &str) -> Result<(), TelemetryInitError> {
    install(parse_filter(directive)?)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, TelemetryInitError> {
    EnvFilter::try_new(directive).map_err(|source| TelemetryInitError::InvalidFilter {
        directive: directive.to_string(),
        source,
    })
}

fn install(filter: EnvFilter) -> Result<(), TelemetryInitError> {
    if INSTALLED.get().is_some() {
        return Ok(());
    }

    let subscriber = tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(());
    Ok(())
}

/// Cuts `value` to at most `max_chars` characters, on a char boundary.
pub fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((cutoff, _)) => &value[..cutoff],
        None => value,
    }
}
