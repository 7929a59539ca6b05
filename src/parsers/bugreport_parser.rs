use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::lines::{Line, Lines};
use crate::parsers::anr_parser::{Anr, AnrParser, AnrWindow, WindowSource};
use crate::parsers::header_parser::{DumpstateHeader, HeaderParser};
use crate::parsers::logcat_parser::{LogEntry, LogLevel, LogSource, Logcat, LogcatParser};
use crate::parsers::monkey_parser::MonkeyLog;
use crate::parsers::vm_traces_parser::{VmTraces, VmTracesParser};
use crate::timing::{parse_duration, ReferenceDate, Timestamp};

/// How long the input dispatcher waits before declaring an ANR.
pub const DEFAULT_ANR_TIMEOUT_MS: i64 = 5_000;

/// InputDispatcher complaints older than this belong to some other hang.
const DISPATCHER_LOOKBACK_SECS: i64 = 60;

// ============================================================================
// BUGREPORT STRUCTURES
// ============================================================================

/// Where a section sat in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Line of the "------ NAME ------" header.
    pub lineno: usize,
    /// Number of body lines after the header.
    pub line_count: usize,
}

/// A process seen anywhere in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmd_line: String,
    /// sysTid → thread name.
    pub threads: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bugreport {
    pub header: DumpstateHeader,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    /// Start time plus the durations dumpstate reported for its sections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Timestamp>,
    pub properties: BTreeMap<String, String>,
    pub system_log: Logcat,
    pub event_log: Logcat,
    /// Merged or separately supplied log the report is built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logcat: Option<Logcat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_traces_just_now: Option<VmTraces>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_traces_last_anr: Option<VmTraces>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anr: Option<Anr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monkey: Option<MonkeyLog>,
    pub sections: Vec<SectionInfo>,

    // Filled in by the inspector.
    #[serde(default)]
    pub known_processes: BTreeMap<u32, ProcessInfo>,
    #[serde(default)]
    pub interesting_log_lines: Vec<LogEntry>,
}

impl Bugreport {
    /// The reference year/month for log lines without a year.
    pub fn reference_date(&self) -> ReferenceDate {
        self.start_time
            .as_ref()
            .map(ReferenceDate::from_timestamp)
            .unwrap_or_default()
    }

    /// The log the report is based on: the supplied or merged logcat if
    /// there is one, otherwise the system log.
    pub fn log(&self) -> &Logcat {
        self.logcat.as_ref().unwrap_or(&self.system_log)
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

// ============================================================================
// PATTERNS
// ============================================================================

struct Patterns {
    section: Regex,
    duration: Regex,
    property: Regex,
    input_dispatcher: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("bugreport regex");
        Patterns {
            section: re(r"^------ ([^(]+?)(?: \((.*)\))? ------$"),
            duration: re(r"^------ (\d+(?:\.\d+)?)s was the duration of '(.*)' ------$"),
            property: re(r"^\[(.*)\]: \[(.*)\]$"),
            input_dispatcher: re(
                r"Application is not responding: .* It has been (\d+\.?\d*)ms since event, (\d+\.?\d*)ms since wait started",
            ),
        }
    })
}

/// Matches InputDispatcher's "ms since wait started" complaint; returns the
/// wait in milliseconds.
pub(crate) fn input_dispatcher_wait(entry: &LogEntry) -> Option<Duration> {
    if entry.tag != "InputDispatcher" {
        return None;
    }
    let caps = patterns().input_dispatcher.captures(&entry.message)?;
    parse_duration(&caps[2], "ms")
}

// ============================================================================
// PARSER
// ============================================================================

/// One section's body as found in the file.
struct RawSection {
    name: String,
    command: Option<String>,
    lineno: usize,
    start: usize,
    end: usize,
}

/// Splits a dumpstate text into sections and hands the ones we understand to
/// their parsers. Never fails: anything unrecognised is skipped.
pub struct BugreportParser;

impl BugreportParser {
    pub fn new() -> Self {
        BugreportParser
    }

    pub fn parse(&self, lines: &mut Lines<'_, Line>) -> Bugreport {
        let mut bugreport = Bugreport::default();
        let (header_end, raw_sections, durations) = self.split_sections(lines);

        bugreport.header = HeaderParser::new().parse(&mut lines.copy(lines.start(), header_end));
        bugreport.start_time = bugreport.header.start_time;
        bugreport.end_time = bugreport.start_time.and_then(|start| {
            let end = durations.iter().try_fold(start, |t, d| t.checked_add_signed(*d));
            if end.is_none() {
                warn!("section durations overflow the dumpstate end time");
            }
            end
        });

        let reference = bugreport.reference_date();
        let mut seen = HashSet::new();
        for section in &raw_sections {
            bugreport.sections.push(SectionInfo {
                name: section.name.clone(),
                command: section.command.clone(),
                lineno: section.lineno,
                line_count: section.end - section.start,
            });
            self.parse_section(&mut bugreport, section, lines, reference, &mut seen);
        }

        bugreport.anr = find_anr(&bugreport);
        if let Some(anr) = &bugreport.anr {
            info!("Found ANR in {} (pid {:?})", anr.process_name, anr.pid);
        }

        bugreport
    }

    /// Returns the end of the header block, every section in file order and
    /// the durations dumpstate logged.
    fn split_sections(&self, lines: &mut Lines<'_, Line>) -> (usize, Vec<RawSection>, Vec<Duration>) {
        let p = patterns();
        let mut header_end = None;
        let mut sections = Vec::new();
        let mut durations = Vec::new();
        let mut current: Option<RawSection> = None;

        while let Some(line) = lines.next() {
            let at = lines.pos() - 1;

            if let Some(caps) = p.duration.captures(&line.text) {
                if let Some(duration) = parse_duration(&caps[1], "s") {
                    durations.push(duration);
                }
                if let Some(mut section) = current.take() {
                    section.end = at;
                    sections.push(section);
                }
                continue;
            }

            if let Some(caps) = p.section.captures(&line.text) {
                header_end.get_or_insert(at);
                if let Some(mut section) = current.take() {
                    section.end = at;
                    sections.push(section);
                }
                current = Some(RawSection {
                    name: caps[1].trim().to_string(),
                    command: caps.get(2).map(|c| c.as_str().to_string()),
                    lineno: line.lineno,
                    start: at + 1,
                    end: lines.end(),
                });
            }
        }

        if let Some(section) = current.take() {
            sections.push(section);
        }

        (header_end.unwrap_or(lines.end()), sections, durations)
    }

    fn parse_section(
        &self,
        bugreport: &mut Bugreport,
        section: &RawSection,
        lines: &Lines<'_, Line>,
        reference: ReferenceDate,
        seen: &mut HashSet<String>,
    ) {
        let known = matches!(
            section.name.as_str(),
            "SYSTEM PROPERTIES" | "SYSTEM LOG" | "EVENT LOG" | "VM TRACES JUST NOW" | "VM TRACES AT LAST ANR"
        );
        if !known {
            return;
        }
        if !seen.insert(section.name.clone()) {
            warn!(lineno = section.lineno, "duplicate section {}, keeping the last one", section.name);
        }
        debug!(lineno = section.lineno, "parsing section {}", section.name);

        let mut body = lines.copy(section.start, section.end);
        match section.name.as_str() {
            "SYSTEM PROPERTIES" => bugreport.properties = parse_properties(&mut body),
            "SYSTEM LOG" => {
                bugreport.system_log = LogcatParser::new(reference, LogSource::System).parse(&mut body)
            }
            "EVENT LOG" => {
                bugreport.event_log = LogcatParser::new(reference, LogSource::Event).parse(&mut body)
            }
            "VM TRACES JUST NOW" => bugreport.vm_traces_just_now = Some(VmTracesParser::new().parse(&mut body)),
            _ => bugreport.vm_traces_last_anr = Some(VmTracesParser::new().parse(&mut body)),
        }
    }
}

impl Default for BugreportParser {
    fn default() -> Self {
        Self::new()
    }
}

/// "[key]: [value]" lines.
fn parse_properties(lines: &mut Lines<'_, Line>) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();
    for line in lines.by_ref() {
        match patterns().property.captures(&line.text) {
            Some(caps) => {
                properties.insert(caps[1].to_string(), caps[2].to_string());
            }
            None if line.text.trim().is_empty() => {}
            None => warn!(lineno = line.lineno, "skipping malformed property line: {}", line.text),
        }
    }
    properties
}

// ============================================================================
// ANR DISCOVERY
// ============================================================================

/// The last "ANR in" report in the system log, or failing that the first
/// process of the last-ANR traces.
fn find_anr(bugreport: &Bugreport) -> Option<Anr> {
    let errors = bugreport.system_log.filter("ActivityManager", LogLevel::Error);
    let log_range = bugreport.system_log.time_range();

    if let Some(mut anr) = AnrParser::new().parse_all(&mut Lines::new(&errors)).pop() {
        let logged_at = anr
            .lineno
            .and_then(|lineno| errors.iter().find(|e| e.lineno == lineno))
            .and_then(|e| e.time);
        anr.logged_at = logged_at;
        anr.window = logged_at.map(|end| {
            let window = window_before(&anr, end, &bugreport.system_log);
            clamp_window(window, log_range)
        });
        anr.vm_traces = bugreport.vm_traces_last_anr.clone();
        return Some(anr);
    }

    let traces = bugreport.vm_traces_last_anr.as_ref()?;
    let process = traces.processes.first()?;
    debug!("no ANR report in the log, using the last-ANR traces of pid {}", process.pid);

    let mut anr = Anr::new(process.cmd_line.clone());
    anr.pid = Some(process.pid);
    anr.window = process.time.map(|end| {
        let window = AnrWindow {
            begin: end - Duration::milliseconds(DEFAULT_ANR_TIMEOUT_MS),
            end,
            source: WindowSource::VmTraces,
        };
        clamp_window(window, log_range)
    });
    anr.vm_traces = Some(traces.clone());
    Some(anr)
}

/// Works out when the hang began, given when it was reported.
fn window_before(anr: &Anr, end: Timestamp, log: &Logcat) -> AnrWindow {
    let dispatcher = log
        .entries
        .iter()
        .rev()
        .filter(|e| e.time.map_or(false, |t| t <= end && end - t <= Duration::seconds(DISPATCHER_LOOKBACK_SECS)))
        .find_map(|e| {
            let begin = e.time?.checked_sub_signed(input_dispatcher_wait(e)?);
            if begin.is_none() {
                warn!(lineno = e.lineno, "input dispatcher wait is out of range");
            }
            begin
        });
    if let Some(begin) = dispatcher.filter(|begin| *begin <= end) {
        return AnrWindow {
            begin,
            end,
            source: WindowSource::InputDispatcher,
        };
    }

    if let Some((begin, _)) = anr.cpu_usage_range.filter(|(begin, _)| *begin <= end) {
        return AnrWindow {
            begin,
            end,
            source: WindowSource::CpuUsage,
        };
    }

    AnrWindow {
        begin: end - Duration::milliseconds(DEFAULT_ANR_TIMEOUT_MS),
        end,
        source: WindowSource::DefaultTimeout,
    }
}

/// Keeps a window inside the time range the log covers.
pub(crate) fn clamp_window(mut window: AnrWindow, range: Option<(Timestamp, Timestamp)>) -> AnrWindow {
    if let Some((lo, hi)) = range {
        window.end = window.end.clamp(lo, hi);
        window.begin = window.begin.clamp(lo, window.end);
    }
    window
}
