//! Session transcript: one JSON line per turn.
//!
//! Each record carries the input, the model, and either the full
//! [`TurnResult`] (events included) or the error that ended the turn, so a
//! misbehaving session can be replayed and inspected afterwards.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::agent::event::TurnResult;
use crate::error::{AgentError, CommandError, Result};

#[derive(Debug, Serialize)]
struct TurnRecord<'a> {
    turn: usize,
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a TurnResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Append-only JSON-lines transcript.
#[derive(Debug)]
pub struct Transcript {
    file: File,
    turns: usize,
}

impl Transcript {
    /// Opens `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file, turns: 0 })
    }

    /// Appends one turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn record(
        &mut self,
        model: &str,
        input: &str,
        outcome: &std::result::Result<TurnResult, AgentError>,
    ) -> Result<()> {
        self.turns += 1;
        let record = TurnRecord {
            turn: self.turns,
            model,
            input,
            result: outcome.as_ref().ok(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| CommandError::OutputFormat(format!("transcript record: {e}")))?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        Ok(())
    }
}
