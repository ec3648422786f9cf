//! Ingestion progress reporting.
//!
//! Emitted on **stderr** so stdout remains parseable for scripts. One event
//! per finished item; workers finish in any order so `n` counts completions,
//! not input positions.

use std::io::Write;

/// Outcome of one item in an `add` or `reindex` batch.
#[derive(Clone, Debug, PartialEq)]
pub enum IngestProgressEvent {
    Added { path: String, n: u64, total: u64 },
    Skipped { path: String, reason: String, n: u64, total: u64 },
    Failed { path: String, error: String, n: u64, total: u64 },
}

pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "[  3 / 120] added  notes/a.md".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let (status, path, detail, n, total) = match &event {
            IngestProgressEvent::Added { path, n, total } => ("added", path, None, n, total),
            IngestProgressEvent::Skipped {
                path,
                reason,
                n,
                total,
            } => ("skipped", path, Some(reason), n, total),
            IngestProgressEvent::Failed {
                path,
                error,
                n,
                total,
            } => ("failed", path, Some(error), n, total),
        };
        let width = total.to_string().len();
        let mut line = format!("[{:>width$} / {}] {:<7} {}", n, total, status, path);
        if let Some(detail) = detail {
            line.push_str(&format!(" ({})", detail));
        }
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", line);
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Added { path, n, total } => serde_json::json!({
                "event": "added",
                "path": path,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Skipped {
                path,
                reason,
                n,
                total,
            } => serde_json::json!({
                "event": "skipped",
                "path": path,
                "reason": reason,
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Failed {
                path,
                error,
                n,
                total,
            } => serde_json::json!({
                "event": "failed",
                "path": path,
                "error": error,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("human"), Some(ProgressMode::Human));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
