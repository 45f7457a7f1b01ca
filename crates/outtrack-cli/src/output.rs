//! Shared output layer: human text or stable JSON on stdout, errors on stderr.

use std::fmt;
use std::io::{self, Write};

use outtrack_core::ErrorCode;
use outtrack_core::config::ConfigError;
use outtrack_core::ingest::IngestError;
use outtrack_core::lock::LockError;
use outtrack_core::store::StoreError;
use serde::Serialize;

/// Width of the rule printed under section headings.
pub const RULE_WIDTH: usize = 60;

/// Write a section heading followed by a separator.
pub fn section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    writeln!(w, "{:-<width$}", "", width = RULE_WIDTH)
}

/// Render a left-aligned key/value line.
pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<18} {}", format!("{key}:"), value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Render `value` as pretty JSON or through `human_fn`.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if mode.is_json() {
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
    } else {
        human_fn(value, &mut out)?;
    }
    Ok(())
}

/// A command failure that carries its own classification.
#[derive(Debug)]
pub struct CodedError {
    pub code: ErrorCode,
    pub message: String,
}

impl CodedError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CodedError {}

/// Classify a failure by the first coded error in its chain.
pub fn error_code(err: &anyhow::Error) -> ErrorCode {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CodedError>() {
            return e.code;
        }
        if let Some(e) = cause.downcast_ref::<IngestError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<ConfigError>() {
            return e.code();
        }
        if let Some(e) = cause.downcast_ref::<LockError>() {
            return e.code();
        }
        if cause.downcast_ref::<StoreError>().is_some() {
            return ErrorCode::PersistenceFailed;
        }
    }
    ErrorCode::InternalUnexpected
}

#[derive(Debug, Serialize)]
struct ErrorPayload<'a> {
    error_code: &'static str,
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'a str>,
}

/// Log and render a fatal failure to stderr.
pub fn render_failure(mode: OutputMode, err: &anyhow::Error) {
    let code = error_code(err);
    let message = format!("{err:#}");
    tracing::error!(code = code.code(), error = %message, "command failed");

    let stderr = io::stderr();
    let mut out = stderr.lock();
    // Nothing useful can be done if stderr itself is gone.
    let _ = match mode {
        OutputMode::Json => {
            let payload = ErrorPayload {
                error_code: code.code(),
                kind: code.message(),
                message,
                hint: code.hint(),
            };
            serde_json::to_writer_pretty(&mut out, &serde_json::json!({ "error": payload }))
                .map_err(io::Error::from)
                .and_then(|()| writeln!(out))
        }
        OutputMode::Human => writeln!(out, "error[{code}]: {message}").and_then(|()| {
            code.hint()
                .map_or(Ok(()), |hint| writeln!(out, "  hint: {hint}"))
        }),
    };
}
