use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::inspector::signals::{Cause, Evidence};
use crate::lines::{Lines, TextLine};
use crate::parsers::vm_traces_parser::{StackFrame, VmTraces};
use crate::timing::{parse_timestamp, Timestamp};

// ============================================================================
// ANR STRUCTURES
// ============================================================================

/// Where an ANR's time window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSource {
    /// From an InputDispatcher "ms since wait started" line.
    InputDispatcher,
    /// From the "CPU usage from ... (A to B)" line of the ANR report.
    CpuUsage,
    /// The ANR log line minus the platform's input dispatch timeout.
    DefaultTimeout,
    /// From the dump time of the last-ANR traces.
    VmTraces,
    /// From the monkey log, which overrides everything else.
    Monkey,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnrWindow {
    pub begin: Timestamp,
    /// When the hang was detected.
    pub end: Timestamp,
    pub source: WindowSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anr {
    pub process_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<String>,
    /// The "CPU usage" report lines, verbatim.
    pub cpu_usage: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_usage_range: Option<(Timestamp, Timestamp)>,
    /// Line of the "ANR in" header in its source file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<usize>,
    /// Time of the "ANR in" line itself, when it came from a log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logged_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<AnrWindow>,
    /// Thread dumps captured for this ANR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_traces: Option<VmTraces>,

    // Filled in by the inspector.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Cause>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Anr {
    pub fn new(process_name: impl Into<String>) -> Self {
        Anr {
            process_name: process_name.into(),
            pid: None,
            component_package: None,
            component_class: None,
            reason: None,
            load: None,
            cpu_usage: Vec::new(),
            cpu_usage_range: None,
            lineno: None,
            logged_at: None,
            window: None,
            vm_traces: None,
            cause: None,
            evidence: Vec::new(),
        }
    }

    /// Thread name → frames of the unresponsive process, if its dump exists.
    pub fn stacks(&self) -> std::collections::BTreeMap<&str, &[StackFrame]> {
        match (&self.vm_traces, self.pid) {
            (Some(traces), Some(pid)) => traces.stacks(pid),
            _ => Default::default(),
        }
    }
}

// ============================================================================
// ANR BLOCK PARSER
// ============================================================================

struct Patterns {
    anr_in: Regex,
    pid: Regex,
    reason: Regex,
    load: Regex,
    cpu_usage: Regex,
    cpu_line: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("anr regex");
        Patterns {
            anr_in: re(r"^ANR in (\S+)(?: \(([^/\s]+)/([^)\s]+)\))?"),
            pid: re(r"^PID: (\d+)"),
            reason: re(r"^Reason: (.*)$"),
            load: re(r"^Load: (.*)$"),
            cpu_usage: re(r"^CPU usage from (-?\d+)ms to (-?\d+)ms ago(?: \((.+?) to (.+?)\))?"),
            cpu_line: re(r"^\s*(?:[+-]?\d+(?:\.\d+)?% |TOTAL:|\d+(?:\.\d+)?% TOTAL)"),
        }
    })
}

/// Parses the block ActivityManager writes for an ANR:
///
/// ```text
/// ANR in com.example.app (com.example.app/.MainActivity)
/// PID: 1234
/// Reason: Input dispatching timed out (...)
/// Load: 1.0 / 2.0 / 3.0
/// CPU usage from 5040ms to -2180ms ago (2016-03-18 14:21:40.432 to 2016-03-18 14:21:47.651):
///   12% 1234/com.example.app: 10% user + 2% kernel
/// ```
///
/// Works over raw lines (monkey logs) and over log entries (the message of
/// each ActivityManager line).
pub struct AnrParser;

impl AnrParser {
    pub fn new() -> Self {
        AnrParser
    }

    /// Whether a line starts an ANR block.
    pub fn is_anr_start(text: &str) -> bool {
        patterns().anr_in.is_match(text.trim_start())
    }

    /// Finds every ANR block in the cursor's window.
    pub fn parse_all<T: TextLine>(&self, lines: &mut Lines<'_, T>) -> Vec<Anr> {
        let mut anrs = Vec::new();
        while let Some(line) = lines.next() {
            if Self::is_anr_start(line.text()) {
                lines.rewind();
                if let Some(anr) = self.parse(lines) {
                    anrs.push(anr);
                }
            }
        }
        anrs
    }

    /// Parses one block starting at the cursor. Stops at the first line that
    /// doesn't belong to it and leaves the cursor on that line.
    pub fn parse<T: TextLine>(&self, lines: &mut Lines<'_, T>) -> Option<Anr> {
        let p = patterns();
        let first = lines.next()?;
        let caps = match p.anr_in.captures(first.text().trim_start()) {
            Some(caps) => caps,
            None => {
                lines.rewind();
                return None;
            }
        };

        let mut anr = Anr::new(&caps[1]);
        anr.lineno = Some(first.lineno());
        if let (Some(package), Some(class)) = (caps.get(2), caps.get(3)) {
            let package = package.as_str().to_string();
            let class = class.as_str();
            anr.component_class = Some(if class.starts_with('.') {
                format!("{}{}", package, class)
            } else {
                class.to_string()
            });
            anr.component_package = Some(package);
        }

        let mut in_cpu_usage = false;
        while let Some(line) = lines.next() {
            let text = line.text();
            let trimmed = text.trim_start();

            if let Some(caps) = p.pid.captures(trimmed) {
                anr.pid = caps[1].parse().ok();
            } else if let Some(caps) = p.reason.captures(trimmed) {
                anr.reason = Some(caps[1].trim().to_string());
            } else if let Some(caps) = p.load.captures(trimmed) {
                anr.load = Some(caps[1].trim().to_string());
            } else if let Some(caps) = p.cpu_usage.captures(trimmed) {
                in_cpu_usage = true;
                anr.cpu_usage.push(text.to_string());
                if anr.cpu_usage_range.is_none() {
                    if let (Some(begin), Some(end)) = (caps.get(3), caps.get(4)) {
                        if let (Some(begin), Some(end)) =
                            (parse_timestamp(begin.as_str()), parse_timestamp(end.as_str()))
                        {
                            anr.cpu_usage_range = Some((begin, end));
                        }
                    }
                }
            } else if in_cpu_usage && p.cpu_line.is_match(text) {
                anr.cpu_usage.push(text.to_string());
            } else if trimmed.starts_with("Parent:") || trimmed.starts_with("Frozen:") || trimmed.is_empty() {
                continue;
            } else {
                debug!(lineno = line.lineno(), "end of ANR block: {}", text);
                lines.rewind();
                break;
            }
        }

        Some(anr)
    }
}

impl Default for AnrParser {
    fn default() -> Self {
        Self::new()
    }
}
