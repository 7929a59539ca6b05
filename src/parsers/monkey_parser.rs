use std::sync::OnceLock;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BugreportError, Result};
use crate::lines::{Line, Lines};
use crate::parsers::anr_parser::{Anr, AnrParser, AnrWindow, WindowSource};
use crate::parsers::bugreport_parser::{Bugreport, DEFAULT_ANR_TIMEOUT_MS};
use crate::parsers::logcat_parser::parse_log_line;
use crate::parsers::vm_traces_parser::VmTracesParser;
use crate::timing::{parse_timestamp, ReferenceDate, Timestamp};

// ============================================================================
// MONKEY STRUCTURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonkeyEventKind {
    /// ":Monkey: seed=N count=N"
    Start { seed: Option<u64>, count: Option<u64> },
    /// ":Sending Touch (ACTION_DOWN): ..."
    Sending { event: String },
    /// ":Switch: #Intent;..."
    Switch { intent: String },
    Sleep { millis: u64 },
    NotResponding { process: String, pid: Option<u32> },
    Crash { process: String, pid: Option<u32> },
    Aborted,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonkeyEvent {
    pub lineno: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    #[serde(flatten)]
    pub kind: MonkeyEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonkeyCrash {
    pub lineno: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    pub process: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_msg: Option<String>,
    /// The remaining "// " lines of the crash report.
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonkeyLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub events: Vec<MonkeyEvent>,
    pub crashes: Vec<MonkeyCrash>,
    /// Processes reported as not responding, in order.
    pub anr_processes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_injected: Option<u64>,
    pub aborted: bool,
}

// ============================================================================
// PATTERNS
// ============================================================================

struct Patterns {
    timestamp: Regex,
    start: Regex,
    seed: Regex,
    count: Regex,
    sending: Regex,
    switch: Regex,
    sleeping: Regex,
    not_responding: Regex,
    crash: Regex,
    short_msg: Regex,
    long_msg: Regex,
    aborted: Regex,
    injected: Regex,
    finished: Regex,
    process_begin: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("monkey regex");
        Patterns {
            timestamp: re(r"^(\d{4}-\d\d-\d\d \d\d:\d\d:\d\d(?:\.\d{3})?)\s+(.*)$"),
            start: re(r"^:Monkey:"),
            seed: re(r"\bseed=(\d+)"),
            count: re(r"\bcount=(\d+)"),
            sending: re(r"^:Sending (.*)$"),
            switch: re(r"^:Switch: (.*)$"),
            sleeping: re(r"^(?://\s*)?Sleeping for (\d+) milliseconds"),
            not_responding: re(r"^// NOT RESPONDING: (\S+) \(pid (\d+)\)"),
            crash: re(r"^// CRASH: (\S+) \(pid (\d+)\)"),
            short_msg: re(r"^// Short Msg: (.*)$"),
            long_msg: re(r"^// Long Msg: (.*)$"),
            aborted: re(r"^\*\* Monkey aborted"),
            injected: re(r"^Events injected: (\d+)"),
            finished: re(r"^// Monkey finished"),
            process_begin: re(r"^----- pid \d+ at .* -----$"),
        }
    })
}

/// Lines that start a new monkey event and so end whatever came before.
fn is_event_line(text: &str) -> bool {
    let p = patterns();
    text.starts_with(':')
        || p.not_responding.is_match(text)
        || p.crash.is_match(text)
        || p.aborted.is_match(text)
        || p.injected.is_match(text)
        || p.finished.is_match(text)
        || text.starts_with("// anr traces status")
}

// ============================================================================
// PARSER
// ============================================================================

/// Reads the output of `adb shell monkey` and folds it into a bugreport.
pub struct MonkeyParser;

impl MonkeyParser {
    pub fn new() -> Self {
        MonkeyParser
    }

    /// Records the monkey run on the bugreport. An ANR reported by the monkey
    /// replaces whatever the bugreport found on its own.
    pub fn parse(&self, bugreport: &mut Bugreport, lines: &mut Lines<'_, Line>) -> Result<()> {
        let (stripped, times) = strip_timestamps(lines, bugreport.reference_date());
        let (log, anr) = self.parse_stripped(&mut Lines::new(&stripped), &times)?;

        if let Some(mut anr) = anr {
            if anr.vm_traces.is_none() {
                anr.vm_traces = bugreport.vm_traces_last_anr.clone();
            }
            if let Some(previous) = &bugreport.anr {
                info!(
                    "Monkey ANR in {} supersedes the bugreport's ANR in {}",
                    anr.process_name, previous.process_name
                );
            }
            bugreport.anr = Some(anr);
        }
        bugreport.monkey = Some(log);
        Ok(())
    }

    fn parse_stripped(&self, lines: &mut Lines<'_, Line>, times: &[Option<Timestamp>]) -> Result<(MonkeyLog, Option<Anr>)> {
        let p = patterns();
        let mut log = MonkeyLog::default();
        let mut anr = None;
        let mut recognized = false;

        while let Some(line) = lines.next() {
            let time = times.get(lines.pos() - 1).copied().flatten();
            let text = line.text.trim();
            let event = |kind| MonkeyEvent {
                lineno: line.lineno,
                time,
                kind,
            };

            let kind = if p.start.is_match(text) {
                let seed = p.seed.captures(text).and_then(|c| c[1].parse().ok());
                let count = p.count.captures(text).and_then(|c| c[1].parse().ok());
                log.seed = seed;
                log.count = count;
                MonkeyEventKind::Start { seed, count }
            } else if let Some(caps) = p.sending.captures(text) {
                MonkeyEventKind::Sending {
                    event: caps[1].to_string(),
                }
            } else if let Some(caps) = p.switch.captures(text) {
                MonkeyEventKind::Switch {
                    intent: caps[1].to_string(),
                }
            } else if let Some(caps) = p.sleeping.captures(text) {
                match caps[1].parse() {
                    Ok(millis) => MonkeyEventKind::Sleep { millis },
                    Err(_) => {
                        warn!(lineno = line.lineno, "bad sleep duration: {}", text);
                        continue;
                    }
                }
            } else if let Some(caps) = p.not_responding.captures(text) {
                let process = caps[1].to_string();
                let pid = caps[2].parse().ok();
                log.anr_processes.push(process.clone());
                anr = Some(self.parse_anr(lines, &process, pid, time));
                MonkeyEventKind::NotResponding { process, pid }
            } else if let Some(caps) = p.crash.captures(text) {
                let process = caps[1].to_string();
                let pid = caps[2].parse().ok();
                log.crashes.push(self.parse_crash(lines, line.lineno, time, &process, pid));
                MonkeyEventKind::Crash { process, pid }
            } else if p.aborted.is_match(text) {
                log.aborted = true;
                MonkeyEventKind::Aborted
            } else if let Some(caps) = p.injected.captures(text) {
                log.events_injected = caps[1].parse().ok();
                recognized = true;
                continue;
            } else if p.finished.is_match(text) {
                MonkeyEventKind::Finished
            } else {
                if text.starts_with(':') {
                    warn!(lineno = line.lineno, "skipping unrecognized monkey event: {}", text);
                }
                continue;
            };

            recognized = true;
            log.events.push(event(kind));
        }

        if !recognized {
            return Err(BugreportError::NotMonkeyLog(format!(
                "no monkey events in {} lines",
                lines.len()
            )));
        }
        Ok((log, anr))
    }

    /// The ANR block and optional traces following a NOT RESPONDING marker.
    fn parse_anr(&self, lines: &mut Lines<'_, Line>, process: &str, pid: Option<u32>, time: Option<Timestamp>) -> Anr {
        while lines.peek().map_or(false, |l| l.text.trim().is_empty()) {
            lines.next();
        }

        let mut anr = if AnrParser::is_anr_start(lines.peek().map_or("", |l| l.text.as_str())) {
            AnrParser::new().parse(lines).unwrap_or_else(|| Anr::new(process))
        } else {
            debug!("NOT RESPONDING marker for {} without an ANR block", process);
            Anr::new(process)
        };
        if anr.pid.is_none() {
            anr.pid = pid;
        }
        anr.logged_at = time;

        // Traces run from the first process header to the next monkey event.
        let start = lines.pos();
        let mut traces_start = None;
        let mut end = lines.end();
        let mut scan = lines.copy(start, lines.end());
        while let Some(candidate) = scan.next() {
            let text = candidate.text.trim();
            if patterns().process_begin.is_match(text) {
                traces_start.get_or_insert(scan.pos() - 1);
            } else if is_event_line(text) {
                end = scan.pos() - 1;
                break;
            }
        }
        if let Some(traces_start) = traces_start {
            let traces = VmTracesParser::new().parse(&mut lines.copy(traces_start, end));
            if !traces.processes.is_empty() {
                anr.vm_traces = Some(traces);
            }
            lines.rewind_to(end);
        }

        let traces_time = anr.vm_traces.as_ref().and_then(|traces| {
            let process = anr
                .pid
                .and_then(|pid| traces.process(pid))
                .or_else(|| traces.processes.first())?;
            process.time
        });
        // The monkey's own marker time ends the window. The CPU usage range
        // only supplies a start, and only when it lies before that end.
        let end = time
            .or_else(|| anr.cpu_usage_range.map(|(_, end)| end))
            .or(traces_time);
        anr.window = end.and_then(|end| {
            let begin = match anr.cpu_usage_range {
                Some((begin, _)) if begin <= end => Some(begin),
                _ => end.checked_sub_signed(Duration::milliseconds(DEFAULT_ANR_TIMEOUT_MS)),
            }?;
            Some(AnrWindow {
                begin,
                end,
                source: WindowSource::Monkey,
            })
        });

        anr
    }

    /// The "// Short Msg", "// Long Msg" and remaining "// " lines of a crash.
    fn parse_crash(
        &self,
        lines: &mut Lines<'_, Line>,
        lineno: usize,
        time: Option<Timestamp>,
        process: &str,
        pid: Option<u32>,
    ) -> MonkeyCrash {
        let p = patterns();
        let mut crash = MonkeyCrash {
            lineno,
            time,
            process: process.to_string(),
            pid,
            short_msg: None,
            long_msg: None,
            details: Vec::new(),
        };

        while let Some(line) = lines.next() {
            let text = line.text.trim();
            if !text.starts_with("//") || is_event_line(text) {
                lines.rewind();
                break;
            }
            if let Some(caps) = p.short_msg.captures(text) {
                crash.short_msg = Some(caps[1].to_string());
            } else if let Some(caps) = p.long_msg.captures(text) {
                crash.long_msg = Some(caps[1].to_string());
            } else {
                crash.details.push(text.trim_start_matches('/').trim().to_string());
            }
        }

        crash
    }
}

impl Default for MonkeyParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits off any leading timestamp, either a bare "YYYY-MM-DD HH:MM:SS.mmm"
/// or a full log header. Returned vectors are indexed like the cursor.
fn strip_timestamps(lines: &mut Lines<'_, Line>, reference: ReferenceDate) -> (Vec<Line>, Vec<Option<Timestamp>>) {
    let mut stripped = Vec::with_capacity(lines.len());
    let mut times = Vec::with_capacity(lines.len());

    for line in lines.by_ref() {
        if let Some(caps) = patterns().timestamp.captures(&line.text) {
            if let Some(time) = parse_timestamp(&caps[1]) {
                stripped.push(Line::new(line.lineno, &caps[2]));
                times.push(Some(time));
                continue;
            }
        }
        match parse_log_line(line, reference) {
            Some(entry) => {
                stripped.push(Line::new(line.lineno, entry.message));
                times.push(entry.time);
            }
            None => {
                stripped.push(line.clone());
                times.push(None);
            }
        }
    }

    (stripped, times)
}
