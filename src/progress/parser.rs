// src/progress/parser.rs

use std::sync::Arc;

use crate::progress::patterns::{PatternTable, Phase};

/// Structured progress extracted from one output line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Phase,
    pub fraction: f64,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Progress(ProgressUpdate),
    /// The tool announced failure; carries the reason.
    Failure(String),
}

/// Turns raw tool output into progress updates for one job.
///
/// The only state kept is the last fraction (and phase) emitted, so output
/// never goes backwards: a line reporting a lower percentage is dropped.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    table: Arc<PatternTable>,
    last_fraction: f64,
    last_phase: Phase,
}

impl ProgressParser {
    pub fn new(table: Arc<PatternTable>) -> Self {
        Self {
            table,
            last_fraction: 0.0,
            last_phase: Phase::Starting,
        }
    }

    pub fn last_fraction(&self) -> f64 {
        self.last_fraction
    }

    pub fn parse(&mut self, line: &str) -> Option<ParsedLine> {
        if let Some(message) = self.table.match_failure(line) {
            return Some(ParsedLine::Failure(message));
        }

        if self.table.is_completion(line) {
            return self.emit(Phase::Complete, 1.0, Some(line.trim().to_string()));
        }

        let phase = self.table.match_phase(line);

        if let Some(fraction) = self.table.match_fraction(line) {
            if fraction < self.last_fraction {
                return None;
            }
            return self.emit(phase.unwrap_or(Phase::Downloading), fraction, None);
        }

        match phase {
            Some(phase) if phase != self.last_phase => {
                self.emit(phase, self.last_fraction, Some(line.trim().to_string()))
            }
            _ => None,
        }
    }

    fn emit(&mut self, phase: Phase, fraction: f64, message: Option<String>) -> Option<ParsedLine> {
        if fraction == self.last_fraction && phase == self.last_phase {
            return None;
        }
        self.last_fraction = fraction;
        self.last_phase = phase;
        Some(ParsedLine::Progress(ProgressUpdate {
            phase,
            fraction,
            message,
        }))
    }
}
