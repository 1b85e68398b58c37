use std::io::{self, Write};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::domain::Uid;
use crate::pipeline::{ProgressEvent, ProgressSink, RunSummary};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_uids(uids: &[Uid]) -> io::Result<()> {
        Self::print_json(&uids)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                "phase={}; {} ({:.1}s)",
                event.phase,
                event.message,
                elapsed.as_secs_f64()
            ),
            None => tracing::info!("phase={}; {}", event.phase, event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_lines<T: std::fmt::Display>(items: &[T]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for item in items {
            writeln!(stdout, "{item}")?;
        }
        Ok(())
    }

    pub fn print_paths(paths: &[Utf8PathBuf]) -> io::Result<()> {
        Self::print_lines(paths)
    }
}
