//! Access Log
//!
//! Append-only audit trail, one line per answered query:
//! `2024-05-01 09:30:00 alice finance "what was q1 revenue" 0.77`

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Python-style float rendering: `0.0`, `1.0`, `0.77`.
fn format_confidence(confidence: f64) -> String {
    if confidence.fract() == 0.0 {
        format!("{:.1}", confidence)
    } else {
        format!("{}", confidence)
    }
}

/// Render one log line (without the trailing newline).
pub fn format_line(at: DateTime<Local>, username: &str, role: &str, query: &str, confidence: f64) -> String {
    // Keep one entry per line
    let query: String = query
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!(
        "{} {} {} \"{}\" {}",
        at.format("%Y-%m-%d %H:%M:%S"),
        username,
        role,
        query,
        format_confidence(confidence)
    )
}

pub struct AccessLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AccessLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry stamped with the local time.
    pub fn record(&self, username: &str, role: &str, query: &str, confidence: f64) -> std::io::Result<()> {
        let line = format_line(Local::now(), username, role, query, confidence);

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;

        debug!(path = %self.path.display(), user = %username, "Access logged");
        Ok(())
    }
}
