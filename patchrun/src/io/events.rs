//! Append-only structured event stream.
//!
//! The event stream is the sole channel other tools use to observe a run:
//! harnesses assert on it, the operator console tails it, the evidence tool
//! certifies from it. One JSON line per significant stage transition, flushed
//! per record so the file grows monotonically while the run executes. The
//! schema is stable and additive-only.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::Stage;

/// One structured record of a stage transition or outcome.
#[derive(Debug, Clone, Serialize)]
pub struct RunEvent {
    /// Monotonically increasing within one run.
    pub seq: u64,
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    pub change_id: String,
    pub stage: Stage,
    /// Short verb: "enter", "ok", "fail", "skip", "info", "terminal".
    pub kind: String,
    pub payload: Value,
}

/// Single-writer sink for run events. Swapping the sink (file, in-memory for
/// tests) never touches stage logic.
pub trait EventSink {
    fn emit(&mut self, stage: Stage, kind: &str, payload: Value) -> Result<()>;
}

/// Line-delimited JSON sink appending to `<dir>/<change_id>.jsonl`.
pub struct FileEventSink {
    change_id: String,
    path: PathBuf,
    writer: BufWriter<File>,
    seq: u64,
}

impl FileEventSink {
    pub fn open(dir: &Path, change_id: &str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create event dir {}", dir.display()))?;
        let path = dir.join(format!("{change_id}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open event stream {}", path.display()))?;
        Ok(Self {
            change_id: change_id.to_string(),
            path,
            writer: BufWriter::new(file),
            seq: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for FileEventSink {
    fn emit(&mut self, stage: Stage, kind: &str, payload: Value) -> Result<()> {
        let event = RunEvent {
            seq: self.seq,
            ts: Utc::now().to_rfc3339(),
            change_id: self.change_id.clone(),
            stage,
            kind: kind.to_string(),
            payload,
        };
        self.seq += 1;
        let line = serde_json::to_string(&event).context("serialize run event")?;
        writeln!(self.writer, "{line}")
            .with_context(|| format!("append event to {}", self.path.display()))?;
        // Flush per record: consumers tail this file while the run executes.
        self.writer
            .flush()
            .with_context(|| format!("flush event stream {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    pub events: Vec<RunEvent>,
    change_id: String,
}

impl MemoryEventSink {
    pub fn new(change_id: &str) -> Self {
        Self {
            events: Vec::new(),
            change_id: change_id.to_string(),
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.events.iter().map(|e| e.stage).collect()
    }

    pub fn has(&self, stage: Stage, kind: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.stage == stage && e.kind == kind)
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&mut self, stage: Stage, kind: &str, payload: Value) -> Result<()> {
        let seq = self.events.len() as u64;
        self.events.push(RunEvent {
            seq,
            ts: Utc::now().to_rfc3339(),
            change_id: self.change_id.clone(),
            stage,
            kind: kind.to_string(),
            payload,
        });
        Ok(())
    }
}
