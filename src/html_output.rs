//! Static HTML report for an analysed bugreport.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::Duration;
use html_escape::{encode_double_quoted_attribute, encode_text};
use tracing::{info, warn};

use crate::error::{BugreportError, Result};
use crate::parsers::anr_parser::Anr;
use crate::parsers::bugreport_parser::Bugreport;
use crate::parsers::logcat_parser::{LogEntry, LogSource};
use crate::parsers::monkey_parser::MonkeyLog;
use crate::parsers::vm_traces_parser::{LockKind, ProcessSnapshot, StackFrame, ThreadSnapshot, VmTraces};
use crate::timing::{format_duration, format_timestamp, Timestamp};

/// Log lines shown before the earliest point of interest.
const EXCERPT_BEFORE_SECS: i64 = 10;
/// Log lines shown after the ANR was reported.
const EXCERPT_AFTER_SECS: i64 = 5;

const STYLE: &str = r#"
        body { font-family: sans-serif; margin: 1em 2em; }
        h1 { font-size: 1.4em; }
        h2 { font-size: 1.2em; border-bottom: 1px solid #ccc; margin-top: 1.5em; }
        table.triage td:first-child { font-weight: bold; padding-right: 1em; vertical-align: top; }
        .unknown { color: #888; font-style: italic; }
        .cause { color: #b00; font-weight: bold; }
        pre { margin: 0; }
        pre.log span { display: block; }
        pre.log .region-bugreport { background-color: #eef; }
        pre.log .region-anr { background-color: #fee; }
        pre.log .evidence { background-color: #ff8; }
        pre.log .buffer { color: #888; }
        details.process { margin: .5em 0; }
        details.process > summary { font-weight: bold; cursor: pointer; }
        div.thread { margin: .5em 0 .5em 1em; }
        div.thread .badge { font-size: .8em; padding: 0 .3em; margin-left: .3em; border-radius: 3px; background: #ddd; }
        div.thread .blocked { background: #f99; }
        div.thread .binder { background: #9cf; }
        div.thread .interesting { background: #fc6; }
        .frame-native, .frame-kernel { color: #666; }
        .lock { color: #a50; }
"#;

pub struct HtmlRenderer;

impl HtmlRenderer {
    pub fn new() -> Self {
        HtmlRenderer
    }

    /// Writes the report to `path`. A partially written file is removed.
    pub fn render(&self, bugreport: &Bugreport, path: &Path) -> Result<()> {
        let html = self.render_to_string(bugreport);

        let mut file = File::create(path).map_err(|e| BugreportError::io(path, e))?;
        if let Err(e) = file.write_all(html.as_bytes()).and_then(|_| file.flush()) {
            drop(file);
            if let Err(remove_err) = fs::remove_file(path) {
                warn!("could not remove partial report {}: {}", path.display(), remove_err);
            }
            return Err(BugreportError::io(path, e));
        }

        info!("Wrote {} ({} bytes)", path.display(), html.len());
        Ok(())
    }

    pub fn render_to_string(&self, bugreport: &Bugreport) -> String {
        let mut html = String::with_capacity(64 * 1024);
        let title = match &bugreport.anr {
            Some(anr) => format!("ANR in {}", anr.process_name),
            None => "Bugreport".to_string(),
        };

        html.push_str(&format!(
            "<!DOCTYPE html>\n<html>\n<head>\n    <meta charset=\"utf-8\">\n    <title>{}</title>\n    <style>{}</style>\n</head>\n<body>\n<h1>{}</h1>\n",
            encode_text(&title),
            STYLE,
            encode_text(&title)
        ));

        match &bugreport.anr {
            Some(anr) => {
                render_triage(&mut html, anr);
                render_log_excerpt(&mut html, bugreport, anr);
            }
            None => html.push_str("<p class=\"unknown\">No ANR found in this bugreport.</p>\n"),
        }

        if let Some(monkey) = &bugreport.monkey {
            render_monkey(&mut html, monkey);
        }

        render_properties(&mut html, bugreport);

        let blamed = bugreport.anr.as_ref().and_then(|a| a.pid);
        if let Some(traces) = bugreport.anr.as_ref().and_then(|a| a.vm_traces.as_ref()) {
            render_traces(&mut html, "VM traces at the ANR", traces, blamed);
        }
        if let Some(traces) = &bugreport.vm_traces_just_now {
            render_traces(&mut html, "VM traces just now", traces, blamed);
        }

        html.push_str("</body>\n</html>\n");
        html
    }
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TRIAGE
// ============================================================================

fn row(html: &mut String, label: &str, value: &str) {
    html.push_str(&format!(
        "<tr><td>{}</td><td>{}</td></tr>\n",
        encode_text(label),
        encode_text(value)
    ));
}

fn render_triage(html: &mut String, anr: &Anr) {
    html.push_str("<h2>Triage</h2>\n<table class=\"triage\">\n");
    row(html, "Process", &anr.process_name);
    if let Some(pid) = anr.pid {
        row(html, "PID", &pid.to_string());
    }
    if let Some(class) = &anr.component_class {
        let component = match &anr.component_package {
            Some(package) => format!("{}/{}", package, class),
            None => class.clone(),
        };
        row(html, "Component", &component);
    }
    if let Some(reason) = &anr.reason {
        row(html, "Reason", reason);
    }
    if let Some(window) = &anr.window {
        row(
            html,
            "Window",
            &format!(
                "{} to {} ({}, from {:?})",
                format_timestamp(&window.begin),
                format_timestamp(&window.end),
                format_duration(window.end - window.begin),
                window.source
            ),
        );
    }

    match &anr.cause {
        Some(cause) => html.push_str(&format!(
            "<tr><td>Cause</td><td class=\"cause\">{} <span class=\"unknown\">({}, line {})</span></td></tr>\n",
            encode_text(&cause.description),
            encode_text(cause.kind.label()),
            cause.lineno
        )),
        None => html.push_str("<tr><td>Cause</td><td class=\"unknown\">cause unknown</td></tr>\n"),
    }
    html.push_str("</table>\n");

    if !anr.evidence.is_empty() {
        html.push_str("<h3>Evidence</h3>\n<ul class=\"evidence\">\n");
        for evidence in &anr.evidence {
            let time = evidence.entry.time.as_ref().map(format_timestamp).unwrap_or_default();
            let time = match log_anchor(&evidence.entry) {
                Some(anchor) => format!(
                    "<a href=\"#{}\">{}</a>",
                    encode_double_quoted_attribute(&anchor),
                    encode_text(&time)
                ),
                None => encode_text(&time).into_owned(),
            };
            html.push_str(&format!(
                "<li>{} {}: {}</li>\n",
                time,
                encode_text(&evidence.signal),
                encode_text(&evidence.description)
            ));
        }
        html.push_str("</ul>\n");
    }

    if !anr.cpu_usage.is_empty() {
        html.push_str("<h3>CPU usage</h3>\n<pre>");
        for line in &anr.cpu_usage {
            html.push_str(&encode_text(line));
            html.push('\n');
        }
        html.push_str("</pre>\n");
    }

    let traces = match &anr.vm_traces {
        Some(traces) => traces,
        None => return,
    };

    // Threads already shown are left out of the later lists.
    let mut shown: HashSet<(u32, String)> = HashSet::new();
    if let Some(pid) = anr.pid {
        if let (Some(process), Some(main)) = (traces.process(pid), traces.thread(pid, "main")) {
            html.push_str("<h3>Main thread</h3>\n");
            render_thread(html, process, main);
            shown.insert((pid, main.name.clone()));
        }
    }

    if !traces.deadlock.is_empty() {
        html.push_str("<h3>Deadlock</h3>\n<ol class=\"deadlock\">\n");
        for thread in &traces.deadlock {
            let cmd_line = traces.process(thread.pid).map(|p| p.cmd_line.as_str()).unwrap_or("");
            let tid = thread.tid.map(|t| format!(" tid={}", t)).unwrap_or_default();
            html.push_str(&format!(
                "<li>{} ({}) &quot;{}&quot;{}</li>\n",
                encode_text(cmd_line),
                thread.pid,
                encode_text(&thread.name),
                tid
            ));
        }
        html.push_str("</ol>\n");

        let mut deadlocked: Vec<ProcessSnapshot> = Vec::new();
        for thread in &traces.deadlock {
            if let (Some(process), Some(snapshot)) = (traces.process(thread.pid), traces.thread(thread.pid, &thread.name)) {
                match deadlocked.iter_mut().find(|p| p.pid == process.pid) {
                    Some(existing) => existing.threads.push(snapshot.clone()),
                    None => deadlocked.push(ProcessSnapshot {
                        threads: vec![snapshot.clone()],
                        ..process.clone()
                    }),
                }
            }
        }
        let deadlocked = unseen(&mut shown, &deadlocked);
        render_processes(html, &deadlocked, anr.pid);
    }

    let interesting = unseen(&mut shown, &traces.interesting_processes);
    if !interesting.is_empty() {
        html.push_str("<h3>Interesting processes</h3>\n");
        render_processes(html, &interesting, anr.pid);
    }
}

/// Copies of `processes` without the threads already in `shown`, which is
/// updated. Processes left with no threads are dropped.
fn unseen(shown: &mut HashSet<(u32, String)>, processes: &[ProcessSnapshot]) -> Vec<ProcessSnapshot> {
    processes
        .iter()
        .filter_map(|process| {
            let threads: Vec<ThreadSnapshot> = process
                .threads
                .iter()
                .filter(|t| shown.insert((process.pid, t.name.clone())))
                .cloned()
                .collect();
            if threads.is_empty() {
                None
            } else {
                Some(ProcessSnapshot {
                    threads,
                    ..process.clone()
                })
            }
        })
        .collect()
}

// ============================================================================
// LOG
// ============================================================================

/// `source-lineno`. Made up entries have no line and no anchor.
fn log_anchor(entry: &LogEntry) -> Option<String> {
    if entry.lineno == 0 {
        return None;
    }
    let source = match entry.source {
        LogSource::System => "system",
        LogSource::Event => "event",
        LogSource::Logcat => "logcat",
    };
    Some(format!("{}-{}", source, entry.lineno))
}

/// Hover text naming who logged an entry.
fn log_title(entry: &LogEntry) -> String {
    let mut title = format!("Process: {}", entry.process.as_deref().unwrap_or("??"));
    if let Some(thread) = &entry.thread {
        title.push_str(&format!("\nThread: {}", thread));
    }
    title
}

/// Links to the log lines the inspector picked out, with the ones outside
/// the excerpt shown as plain text.
fn render_interesting_lines(html: &mut String, lines: &[LogEntry], excerpt: &HashSet<(LogSource, usize)>) {
    if lines.is_empty() {
        return;
    }
    html.push_str("<h3>Interesting lines</h3>\n<ul class=\"interesting\">\n");
    for entry in lines {
        let text = if entry.is_buffer_begin() {
            entry.message.clone()
        } else {
            let time = entry.time.as_ref().map(format_timestamp).unwrap_or_default();
            format!("{} {}/{}: {}", time, entry.level.as_char(), entry.tag, entry.message)
        };
        match log_anchor(entry).filter(|_| excerpt.contains(&(entry.source, entry.lineno))) {
            Some(anchor) => html.push_str(&format!(
                "<li><a href=\"#{}\" title=\"{}\">{}</a></li>\n",
                encode_double_quoted_attribute(&anchor),
                encode_double_quoted_attribute(&log_title(entry)),
                encode_text(&text)
            )),
            None => html.push_str(&format!(
                "<li title=\"{}\">{}</li>\n",
                encode_double_quoted_attribute(&log_title(entry)),
                encode_text(&text)
            )),
        }
    }
    html.push_str("</ul>\n");
}

/// The stretch of log worth showing: from a little before the earliest
/// evidence or window start to a little after the ANR.
fn excerpt_range(anr: &Anr) -> Option<(Timestamp, Timestamp)> {
    let (begin, end) = match (&anr.window, anr.logged_at) {
        (Some(window), _) => (window.begin, window.end),
        (None, Some(at)) => (at, at),
        (None, None) => return None,
    };
    let earliest = anr
        .evidence
        .iter()
        .filter_map(|e| e.entry.time)
        .chain(std::iter::once(begin))
        .min()
        .unwrap_or(begin);
    Some((
        earliest - Duration::seconds(EXCERPT_BEFORE_SECS),
        end + Duration::seconds(EXCERPT_AFTER_SECS),
    ))
}

fn render_log_excerpt(html: &mut String, bugreport: &Bugreport, anr: &Anr) {
    let range = excerpt_range(anr);
    let entries: Vec<&LogEntry> = match range {
        Some((begin, end)) => bugreport
            .log()
            .entries
            .iter()
            .filter(|e| e.time.map_or(false, |t| t >= begin && t <= end))
            .collect(),
        None => Vec::new(),
    };
    if entries.is_empty() && bugreport.interesting_log_lines.is_empty() {
        return;
    }

    html.push_str("<h2>Log</h2>\n");
    let shown: HashSet<(LogSource, usize)> = entries.iter().map(|e| (e.source, e.lineno)).collect();
    render_interesting_lines(html, &bugreport.interesting_log_lines, &shown);

    let (begin, end) = match range {
        Some(range) if !entries.is_empty() => range,
        _ => return,
    };
    let evidence: HashSet<(LogSource, usize)> = anr
        .evidence
        .iter()
        .map(|e| (e.entry.source, e.entry.lineno))
        .collect();

    html.push_str(&format!(
        "<p>{} to {}</p>\n<pre class=\"log\">",
        encode_text(&format_timestamp(&begin)),
        encode_text(&format_timestamp(&end))
    ));
    for entry in entries {
        let mut classes = Vec::new();
        if entry.region_bugreport {
            classes.push("region-bugreport");
        }
        if entry.region_anr {
            classes.push("region-anr");
        }
        if evidence.contains(&(entry.source, entry.lineno)) {
            classes.push("evidence");
        }
        if entry.is_buffer_begin() {
            classes.push("buffer");
        }
        let id = log_anchor(entry)
            .map(|anchor| format!(" id=\"{}\"", encode_double_quoted_attribute(&anchor)))
            .unwrap_or_default();
        let title = if entry.is_buffer_begin() {
            String::new()
        } else {
            format!(" title=\"{}\"", encode_double_quoted_attribute(&log_title(entry)))
        };
        html.push_str(&format!(
            "<span{} class=\"{}\"{}>{}</span>",
            id,
            classes.join(" "),
            title,
            encode_text(&entry.raw_text())
        ));
    }
    html.push_str("</pre>\n");
}

// ============================================================================
// MONKEY & PROPERTIES
// ============================================================================

fn render_monkey(html: &mut String, monkey: &MonkeyLog) {
    html.push_str("<h2>Monkey</h2>\n<table class=\"triage\">\n");
    if let Some(seed) = monkey.seed {
        row(html, "Seed", &seed.to_string());
    }
    if let Some(count) = monkey.count {
        row(html, "Count", &count.to_string());
    }
    if let Some(injected) = monkey.events_injected {
        row(html, "Events injected", &injected.to_string());
    }
    row(html, "Events parsed", &monkey.events.len().to_string());
    if monkey.aborted {
        row(html, "Status", "aborted");
    }
    if !monkey.anr_processes.is_empty() {
        row(html, "Not responding", &monkey.anr_processes.join(", "));
    }
    html.push_str("</table>\n");

    for crash in &monkey.crashes {
        let pid = crash.pid.map(|p| format!(" (pid {})", p)).unwrap_or_default();
        html.push_str(&format!(
            "<h3>Crash: {}{}</h3>\n<pre>",
            encode_text(&crash.process),
            pid
        ));
        for line in crash.short_msg.iter().chain(crash.long_msg.iter()).chain(crash.details.iter()) {
            html.push_str(&encode_text(line));
            html.push('\n');
        }
        html.push_str("</pre>\n");
    }
}

fn render_properties(html: &mut String, bugreport: &Bugreport) {
    let header = &bugreport.header;
    let build = [
        ("Build", &header.build),
        ("Fingerprint", &header.build_fingerprint),
        ("Bootloader", &header.bootloader),
        ("Radio", &header.radio),
        ("Kernel", &header.kernel),
        ("Uptime", &header.uptime),
    ];
    if bugreport.properties.is_empty() && build.iter().all(|(_, v)| v.is_none()) {
        return;
    }

    html.push_str("<h2>Properties</h2>\n<table class=\"triage\">\n");
    for (label, value) in build {
        if let Some(value) = value {
            row(html, label, value);
        }
    }
    if let Some(start) = &bugreport.start_time {
        row(html, "Captured", &format_timestamp(start));
    }
    html.push_str("</table>\n<details>\n<summary>System properties</summary>\n<table class=\"triage\">\n");
    for (key, value) in &bugreport.properties {
        row(html, key, value);
    }
    html.push_str("</table>\n</details>\n");
}

// ============================================================================
// PROCESSES & THREADS
// ============================================================================

/// Blamed process first, then system_server, then by command line with
/// paths (native daemons) last.
pub(crate) fn sort_processes(processes: &mut [ProcessSnapshot], blamed: Option<u32>) {
    processes.sort_by(|a, b| {
        let key = |p: &ProcessSnapshot| {
            (
                Some(p.pid) != blamed,
                p.cmd_line != "system_server",
                p.cmd_line.starts_with('/'),
            )
        };
        key(a).cmp(&key(b)).then_with(|| a.cmd_line.cmp(&b.cmd_line))
    });
}

fn thread_rank(thread: &ThreadSnapshot) -> u8 {
    if thread.name == "main" {
        0
    } else if thread.blocked {
        1
    } else if thread.is_binder() {
        2
    } else if thread.interesting {
        3
    } else {
        4
    }
}

/// main, blocked, binder, interesting, then the rest. Stable within a group.
pub(crate) fn sort_threads(threads: &mut [ThreadSnapshot]) {
    threads.sort_by_key(thread_rank);
}

fn render_traces(html: &mut String, title: &str, traces: &VmTraces, blamed: Option<u32>) {
    html.push_str(&format!("<h2>{}</h2>\n", encode_text(title)));
    render_processes(html, &traces.processes, blamed);
}

fn render_processes(html: &mut String, processes: &[ProcessSnapshot], blamed: Option<u32>) {
    let mut processes = processes.to_vec();
    sort_processes(&mut processes, blamed);

    for process in &mut processes {
        sort_threads(&mut process.threads);
        let open = if Some(process.pid) == blamed { " open" } else { "" };
        html.push_str(&format!(
            "<details class=\"process\"{}>\n<summary>{} (pid {}) at {}</summary>\n",
            open,
            encode_text(&process.cmd_line),
            process.pid,
            encode_text(&process.date)
        ));
        for thread in &process.threads {
            render_thread(html, process, thread);
        }
        html.push_str("</details>\n");
    }
}

fn render_thread(html: &mut String, process: &ProcessSnapshot, thread: &ThreadSnapshot) {
    let mut header = format!("&quot;{}&quot;", encode_text(&thread.name));
    if thread.daemon {
        header.push_str(" daemon");
    }
    if let Some(priority) = thread.priority {
        header.push_str(&format!(" prio={}", priority));
    }
    if let Some(tid) = thread.tid {
        header.push_str(&format!(" tid={}", tid));
    }
    if let Some(sys_tid) = thread.sys_tid {
        header.push_str(&format!(" sysTid={}", sys_tid));
    }
    if !thread.vm_state.is_empty() {
        header.push_str(&format!(" {}", encode_text(&thread.vm_state)));
    }
    if thread.blocked {
        header.push_str("<span class=\"badge blocked\">blocked</span>");
    }
    if thread.is_binder() {
        header.push_str("<span class=\"badge binder\">binder</span>");
    }
    if thread.interesting {
        header.push_str("<span class=\"badge interesting\">interesting</span>");
    }

    html.push_str(&format!("<div class=\"thread\">\n<div>{}</div>\n", header));
    if let Some(call) = &thread.outbound_binder {
        html.push_str(&format!("<div>calling {}</div>\n", encode_text(&call.qualified_name())));
    }
    if let Some(call) = &thread.inbound_binder {
        html.push_str(&format!("<div>serving {}</div>\n", encode_text(&call.qualified_name())));
    }

    html.push_str("<pre>");
    for attribute in &thread.attributes {
        html.push_str(&format!("  | {}\n", encode_text(attribute)));
    }
    for frame in &thread.frames {
        let class = match frame {
            StackFrame::Java(_) => "frame-java",
            StackFrame::Native(_) => "frame-native",
            StackFrame::Kernel(_) => "frame-kernel",
            StackFrame::Other { .. } => "frame-other",
        };
        html.push_str(&format!(
            "<span class=\"{}\">  {}</span>\n",
            class,
            encode_text(frame.text())
        ));

        if let StackFrame::Java(java) = frame {
            for lock in &java.locks {
                let verb = match lock.kind {
                    LockKind::Locked => "locked",
                    LockKind::Waiting => "waiting on",
                    LockKind::Sleeping => "sleeping on",
                    LockKind::Blocked => "waiting to lock",
                };
                let mut text = match &lock.address {
                    Some(address) => format!("  - {} <{}> (a {})", verb, address, lock.qualified_class()),
                    None => format!("  - {} an unknown object", verb),
                };
                if let Some(owner) = lock.owner_tid {
                    text.push_str(&format!(" held by thread {}", owner));
                    if let Some(holder) = process.thread_by_tid(owner) {
                        text.push_str(&format!(" \"{}\"", holder.name));
                    }
                }
                html.push_str(&format!("<span class=\"lock\">{}</span>\n", encode_text(&text)));
            }
        }
    }
    html.push_str("</pre>\n</div>\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::Inspector;
    use crate::parsers::bugreport_parser::tests::{parse, REPORT};
    use tempfile::tempdir;

    fn inspected() -> Bugreport {
        let mut bugreport = parse(REPORT);
        Inspector::default().inspect(&mut bugreport);
        bugreport
    }

    fn process(pid: u32, cmd_line: &str) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            cmd_line: cmd_line.to_string(),
            date: String::new(),
            time: None,
            threads: Vec::new(),
        }
    }

    #[test]
    fn test_render_triage() {
        let html = HtmlRenderer::new().render_to_string(&inspected());

        assert!(html.contains("<title>ANR in com.example.app</title>"));
        assert!(html.contains("com.example.app/com.example.app.MainActivity"));
        assert!(html.contains("a blocking Alloc GC held up allocation"));
        assert!(!html.contains("cause unknown"));
        assert!(html.contains("class=\"evidence\""));
        assert!(html.contains("Nexus 5"));
        // Lock lines name their owner and are escaped.
        assert!(html.contains("waiting to lock &lt;0x0ab1c2d3&gt;"));
    }

    #[test]
    fn test_log_excerpt_flags_regions() {
        let html = HtmlRenderer::new().render_to_string(&inspected());
        assert!(html.contains("<pre class=\"log\">"));
        assert!(html.contains("class=\"region-anr evidence\" title=\"Process: ??\">03-18 14:21:40.100"));
        // Evidence links point at log lines.
        assert!(html.contains("href=\"#system-"));
    }

    #[test]
    fn test_log_titles_name_process_and_thread() {
        let text = REPORT.replace(
            "03-18 14:21:40.100  1000   612   640 I art",
            "03-18 14:21:40.100  10050  1234  1234 I art",
        );
        let mut bugreport = parse(&text);
        Inspector::default().inspect(&mut bugreport);
        let html = HtmlRenderer::new().render_to_string(&bugreport);

        assert!(html.contains("title=\"Process: com.example.app\nThread: main\">03-18 14:21:40.100"));
        assert!(html.contains("title=\"Process: ??\">03-18 14:21:30.000"));
    }

    #[test]
    fn test_interesting_lines_link_to_log() {
        let bugreport = inspected();
        let html = HtmlRenderer::new().render_to_string(&bugreport);

        assert!(html.contains("<h3>Interesting lines</h3>"));
        let anr_line = bugreport
            .interesting_log_lines
            .iter()
            .find(|e| e.message.starts_with("ANR in"))
            .unwrap();
        let link = format!("<a href=\"#system-{}\"", anr_line.lineno);
        assert!(html.contains(&link));
        assert!(html.contains(&format!("id=\"system-{}\"", anr_line.lineno)));
        assert!(html.contains("2016-03-18 14:21:47.651 E/ActivityManager: ANR in com.example.app"));
        // The made up event marker is listed without a link.
        assert!(html.contains(">--------- beginning of event</li>"));
    }

    #[test]
    fn test_log_anchors_are_unique() {
        let html = HtmlRenderer::new().render_to_string(&inspected());
        let ids: Vec<&str> = html
            .split(" id=\"")
            .skip(1)
            .filter_map(|rest| rest.split('"').next())
            .collect();
        assert!(!ids.is_empty());
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate ids in {:?}", ids);
    }

    #[test]
    fn test_cause_unknown() {
        let mut bugreport = inspected();
        if let Some(anr) = bugreport.anr.as_mut() {
            anr.cause = None;
            anr.evidence.clear();
        }
        let html = HtmlRenderer::new().render_to_string(&bugreport);
        assert!(html.contains("cause unknown"));
    }

    #[test]
    fn test_sort_processes() {
        let mut processes = vec![
            process(1, "/system/bin/surfaceflinger"),
            process(2, "com.zebra"),
            process(3, "system_server"),
            process(4, "com.apple"),
            process(5, "com.blamed"),
        ];
        sort_processes(&mut processes, Some(5));
        let names: Vec<&str> = processes.iter().map(|p| p.cmd_line.as_str()).collect();
        assert_eq!(
            names,
            vec!["com.blamed", "system_server", "com.apple", "com.zebra", "/system/bin/surfaceflinger"]
        );
    }

    #[test]
    fn test_sort_threads() {
        let bugreport = inspected();
        let traces = bugreport.anr.as_ref().unwrap().vm_traces.as_ref().unwrap();
        let main = traces.thread(1234, "main").unwrap().clone();

        let mut other = main.clone();
        other.name = "worker".to_string();
        other.blocked = false;
        other.interesting = false;
        let mut blocked = other.clone();
        blocked.name = "blocked".to_string();
        blocked.blocked = true;
        let mut interesting = other.clone();
        interesting.name = "busy".to_string();
        interesting.interesting = true;

        let mut threads = vec![other, interesting, blocked, main];
        sort_threads(&mut threads);
        let names: Vec<&str> = threads.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["main", "blocked", "busy", "worker"]);
    }

    #[test]
    fn test_render_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("anr.html");
        HtmlRenderer::new().render(&inspected(), &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("<!DOCTYPE html>"));
        assert!(written.ends_with("</html>\n"));
    }

    #[test]
    fn test_render_to_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("anr.html");
        let err = HtmlRenderer::new().render(&inspected(), &path).unwrap_err();
        assert!(matches!(err, BugreportError::Io { .. }));
        assert!(!path.exists());
    }
}
