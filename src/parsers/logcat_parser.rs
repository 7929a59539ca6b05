use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lines::{Line, Lines, TextLine};
use crate::timing::{make_timestamp, ReferenceDate, Timestamp};

// ============================================================================
// LOG STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Verbose,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Assert,
}

impl LogLevel {
    pub fn from_char(c: char) -> Option<LogLevel> {
        match c {
            'V' => Some(LogLevel::Verbose),
            'D' => Some(LogLevel::Debug),
            'I' => Some(LogLevel::Info),
            'W' => Some(LogLevel::Warn),
            'E' => Some(LogLevel::Error),
            'F' => Some(LogLevel::Fatal),
            'A' => Some(LogLevel::Assert),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            LogLevel::Verbose => 'V',
            LogLevel::Debug => 'D',
            LogLevel::Info => 'I',
            LogLevel::Warn => 'W',
            LogLevel::Error => 'E',
            LogLevel::Fatal => 'F',
            LogLevel::Assert => 'A',
        }
    }
}

/// Which buffer a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    System,
    Event,
    Logcat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Line number of the entry's first line in its source file. 0 for
    /// entries that were made up rather than read.
    pub lineno: usize,
    pub source: LogSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<u32>,
    pub level: LogLevel,
    pub tag: String,
    /// Message text; continuation lines are appended after a newline.
    pub message: String,
    /// Everything before the message, as it appeared in the file.
    pub header: String,
    /// Set for "--------- beginning of <buffer>" markers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_begin: Option<String>,
    /// Between an ANR timer starting and firing.
    #[serde(default)]
    pub region_anr: bool,
    /// Logged while the bugreport was being captured.
    #[serde(default)]
    pub region_bugreport: bool,
    /// Command line of the logging process, when the traces name it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// Name of the logging thread, when the traces name it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
}

impl LogEntry {
    pub fn is_buffer_begin(&self) -> bool {
        self.buffer_begin.is_some()
    }

    /// The full text of the entry as a single line would show it.
    pub fn raw_text(&self) -> String {
        if self.header.is_empty() {
            self.message.clone()
        } else {
            format!("{}{}", self.header, self.message)
        }
    }
}

impl TextLine for LogEntry {
    fn lineno(&self) -> usize {
        self.lineno
    }

    fn text(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Logcat {
    pub entries: Vec<LogEntry>,
}

impl Logcat {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with the given tag at or above the given level, in order.
    pub fn filter(&self, tag: &str, min_level: LogLevel) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| !e.is_buffer_begin() && e.tag == tag && e.level >= min_level)
            .collect()
    }

    /// Earliest and latest timestamps present in the log.
    pub fn time_range(&self) -> Option<(Timestamp, Timestamp)> {
        let mut times = self.entries.iter().filter_map(|e| e.time);
        let first = times.next()?;
        let (min, max) = times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        Some((min, max))
    }
}

// ============================================================================
// LINE GRAMMAR
// ============================================================================

/// "[YYYY-]MM-DD HH:MM:SS.mmm [UID] PID TID L TAG: message" (-v threadtime)
fn threadtime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(\d{4})-)?(\d\d)-(\d\d) (\d\d):(\d\d):(\d\d)\.(\d{3})\s+(?:\S+\s+)?(\d+)\s+(\d+)\s+([VDIWEFA])\s+(.*?)\s*: ?(.*)$",
        )
        .expect("threadtime regex")
    })
}

/// "[YYYY-]MM-DD HH:MM:SS.mmm L/TAG( PID): message" (-v time)
fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:(\d{4})-)?(\d\d)-(\d\d) (\d\d):(\d\d):(\d\d)\.(\d{3}) ([VDIWEFA])/(.*?)\(\s*(\d+)\): ?(.*)$",
        )
        .expect("time regex")
    })
}

pub(crate) fn buffer_begin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--------- beginning of (.*)$").expect("buffer regex"))
}

/// Outcome of matching one raw line against the log grammar.
#[derive(Debug)]
enum Parsed {
    Entry(LogEntry),
    BufferBegin(LogEntry),
    /// The line matched the grammar but its date is impossible.
    BadTime(LogEntry),
    Unmatched,
}

/// Parses log text: system, event or a standalone logcat capture.
///
/// The parser can be reused, but is not thread safe.
pub struct LogcatParser {
    reference: ReferenceDate,
    source: LogSource,
}

impl LogcatParser {
    pub fn new(reference: ReferenceDate, source: LogSource) -> Self {
        LogcatParser { reference, source }
    }

    /// Consumes every line of the cursor. Lines outside the grammar are
    /// continuation lines of the previous entry.
    pub fn parse(&self, lines: &mut Lines<'_, Line>) -> Logcat {
        let mut logcat = Logcat::default();

        for line in lines.by_ref() {
            match self.parse_line(line) {
                Parsed::Entry(entry) | Parsed::BufferBegin(entry) => logcat.entries.push(entry),
                Parsed::BadTime(entry) => {
                    warn!(lineno = line.lineno, "log line has an impossible timestamp: {}", line.text);
                    logcat.entries.push(entry);
                }
                Parsed::Unmatched => {
                    if let Some(previous) = logcat.entries.last_mut().filter(|e| !e.is_buffer_begin()) {
                        previous.message.push('\n');
                        previous.message.push_str(&line.text);
                    } else if !line.text.trim().is_empty() {
                        warn!(lineno = line.lineno, "skipping log line with no entry to continue: {}", line.text);
                    }
                }
            }
        }

        logcat
    }

    fn parse_line(&self, line: &Line) -> Parsed {
        let text = line.text.as_str();

        if let Some(caps) = buffer_begin_re().captures(text) {
            return Parsed::BufferBegin(LogEntry {
                lineno: line.lineno,
                source: self.source,
                time: None,
                pid: None,
                tid: None,
                level: LogLevel::Info,
                tag: String::new(),
                message: text.to_string(),
                header: String::new(),
                buffer_begin: Some(caps[1].trim().to_string()),
                region_anr: false,
                region_bugreport: false,
                process: None,
                thread: None,
            });
        }

        if let Some(caps) = threadtime_re().captures(text) {
            let level = caps[10].chars().next().and_then(LogLevel::from_char);
            return self.build(line, &caps, level, &caps[11], Some(&caps[8]), Some(&caps[9]), 12);
        }

        if let Some(caps) = time_re().captures(text) {
            let level = caps[8].chars().next().and_then(LogLevel::from_char);
            return self.build(line, &caps, level, &caps[9], Some(&caps[10]), None, 11);
        }

        Parsed::Unmatched
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        line: &Line,
        caps: &Captures<'_>,
        level: Option<LogLevel>,
        tag: &str,
        pid: Option<&str>,
        tid: Option<&str>,
        message_group: usize,
    ) -> Parsed {
        let level = match level {
            Some(level) => level,
            None => return Parsed::Unmatched,
        };
        let message_match = match caps.get(message_group) {
            Some(m) => m,
            None => return Parsed::Unmatched,
        };

        let time = self.timestamp(caps);
        let entry = LogEntry {
            lineno: line.lineno,
            source: self.source,
            time,
            pid: pid.and_then(|p| p.parse().ok()),
            tid: tid.and_then(|t| t.parse().ok()),
            level,
            tag: tag.trim().to_string(),
            message: message_match.as_str().to_string(),
            header: line.text[..message_match.start()].to_string(),
            buffer_begin: None,
            region_anr: false,
            region_bugreport: false,
            process: None,
            thread: None,
        };

        if time.is_some() {
            Parsed::Entry(entry)
        } else {
            Parsed::BadTime(entry)
        }
    }

    fn timestamp(&self, caps: &Captures<'_>) -> Option<Timestamp> {
        let num = |i: usize| -> Option<u32> { caps.get(i)?.as_str().parse().ok() };
        let month = num(2)?;
        let year = match caps.get(1) {
            Some(y) => y.as_str().parse().ok()?,
            None => self.reference.year_for(month),
        };
        make_timestamp(year, month, num(3)?, num(4)?, num(5)?, num(6)?, num(7)?)
    }
}

/// Parses a single line against the log grammar, for callers outside a log
/// section (monkey logs prefix some lines with a log header).
pub fn parse_log_line(line: &Line, reference: ReferenceDate) -> Option<LogEntry> {
    match LogcatParser::new(reference, LogSource::Logcat).parse_line(line) {
        Parsed::Entry(entry) => Some(entry),
        _ => None,
    }
}
