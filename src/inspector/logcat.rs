//! Log passes: filling in missing times, merging buffers and marking the
//! regions worth highlighting.

use std::collections::BTreeMap;

use tracing::warn;

use crate::parsers::anr_parser::AnrParser;
use crate::parsers::bugreport_parser::{input_dispatcher_wait, ProcessInfo};
use crate::parsers::logcat_parser::{LogEntry, LogLevel, LogSource, Logcat};
use crate::timing::Timestamp;

/// Gives untimed entries the time of the next timed entry, or of the last
/// one for a trailing run. Leaves everything alone if nothing has a time.
pub fn invent_times(entries: &mut [LogEntry]) {
    let mut next: Option<Timestamp> = None;
    for entry in entries.iter_mut().rev() {
        match entry.time {
            Some(time) => next = Some(time),
            None => entry.time = next,
        }
    }

    let last = entries.iter().rev().find_map(|e| e.time);
    for entry in entries.iter_mut().rev() {
        if entry.time.is_some() {
            break;
        }
        entry.time = last;
    }
}

fn event_buffer_marker(first_event: &LogEntry) -> LogEntry {
    let text = "--------- beginning of event";
    LogEntry {
        lineno: 0,
        source: LogSource::Event,
        time: first_event.time,
        pid: None,
        tid: None,
        level: LogLevel::Info,
        tag: String::new(),
        message: text.to_string(),
        header: String::new(),
        buffer_begin: Some("event".to_string()),
        region_anr: false,
        region_bugreport: false,
        process: None,
        thread: None,
    }
}

/// Interleaves the system and event logs by time. Untimed entries are taken
/// as they come. The event log has no buffer marker of its own, so one is
/// made up in front of its first entry.
pub fn merge(system: &Logcat, event: &Logcat) -> Logcat {
    let mut merged = Vec::with_capacity(system.entries.len() + event.entries.len() + 1);
    let mut system_iter = system.entries.iter().peekable();
    let mut event_iter = event.entries.iter().peekable();
    let mut seen_event = false;

    loop {
        let take_system = match (system_iter.peek(), event_iter.peek()) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(s), Some(e)) => match (s.time, e.time) {
                (None, _) => true,
                (_, None) => false,
                (Some(st), Some(et)) => st <= et,
            },
        };

        let next = if take_system {
            system_iter.next()
        } else {
            event_iter.next()
        };
        let entry = match next {
            Some(entry) => entry,
            None => break,
        };

        if !take_system && !seen_event {
            seen_event = true;
            if !entry.is_buffer_begin() {
                merged.push(event_buffer_marker(entry));
            }
        }
        merged.push(entry.clone());
    }

    Logcat { entries: merged }
}

/// Buffer markers and "ANR in" reports.
pub fn interesting_lines(log: &Logcat) -> Vec<LogEntry> {
    log.entries
        .iter()
        .filter(|e| {
            e.is_buffer_begin() || (e.tag == "ActivityManager" && AnrParser::is_anr_start(&e.message))
        })
        .cloned()
        .collect()
}

/// Names the process and thread behind each entry from the pids and tids the
/// traces recorded.
pub fn mark_processes_and_threads(log: &mut Logcat, known: &BTreeMap<u32, ProcessInfo>) {
    for entry in &mut log.entries {
        let process = entry.pid.and_then(|pid| known.get(&pid));
        entry.process = process.map(|p| p.cmd_line.clone());
        entry.thread = process
            .zip(entry.tid)
            .and_then(|(p, tid)| p.threads.get(&tid))
            .cloned();
    }
}

/// Flags entries logged between an input event and the InputDispatcher
/// giving up on it.
pub fn mark_anr_regions(log: &mut Logcat) {
    let regions: Vec<(Timestamp, Timestamp)> = log
        .entries
        .iter()
        .filter_map(|e| {
            let end = e.time?;
            match end.checked_sub_signed(input_dispatcher_wait(e)?) {
                Some(begin) => Some((begin, end)),
                None => {
                    warn!(lineno = e.lineno, "input dispatcher wait is out of range");
                    None
                }
            }
        })
        .collect();

    for entry in &mut log.entries {
        if let Some(time) = entry.time {
            if regions.iter().any(|(begin, end)| time >= *begin && time < *end) {
                entry.region_anr = true;
            }
        }
    }
}

/// Flags entries logged while dumpstate was running.
pub fn mark_bugreport_region(log: &mut Logcat, start: Option<Timestamp>, end: Option<Timestamp>) {
    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        _ => return,
    };
    for entry in &mut log.entries {
        if let Some(time) = entry.time {
            entry.region_bugreport = time >= start && time < end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::{split_lines, Lines};
    use crate::parsers::logcat_parser::LogcatParser;
    use crate::timing::{format_timestamp, parse_timestamp, ReferenceDate};

    fn parse(text: &str, source: LogSource) -> Logcat {
        let lines = split_lines(text);
        LogcatParser::new(ReferenceDate { year: 2016, month: 3 }, source).parse(&mut Lines::new(&lines))
    }

    #[test]
    fn test_invent_times() {
        let mut log = parse(
            "--------- beginning of main
03-18 10:00:01.000   1   1 I A: one
--------- beginning of system
03-18 10:00:02.000   1   1 I A: two
--------- beginning of crash",
            LogSource::System,
        );
        invent_times(&mut log.entries);
        let times: Vec<String> = log.entries.iter().map(|e| format_timestamp(&e.time.unwrap())).collect();
        assert_eq!(
            times,
            vec![
                "2016-03-18 10:00:01.000",
                "2016-03-18 10:00:01.000",
                "2016-03-18 10:00:02.000",
                "2016-03-18 10:00:02.000",
                "2016-03-18 10:00:02.000",
            ]
        );
    }

    #[test]
    fn test_invent_times_without_any_time() {
        let mut log = parse("--------- beginning of main", LogSource::System);
        invent_times(&mut log.entries);
        assert!(log.entries[0].time.is_none());
    }

    #[test]
    fn test_merge_interleaves_by_time() {
        let system = parse(
            "03-18 10:00:01.000   1   1 I A: s1
03-18 10:00:03.000   1   1 I A: s3",
            LogSource::System,
        );
        let event = parse(
            "03-18 10:00:02.000   1   1 I am_proc_start: e2
03-18 10:00:04.000   1   1 I am_proc_died: e4",
            LogSource::Event,
        );
        let merged = merge(&system, &event);
        let messages: Vec<&str> = merged.entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["s1", "--------- beginning of event", "e2", "s3", "e4"]);
        assert_eq!(merged.entries[1].buffer_begin.as_deref(), Some("event"));
        assert_eq!(merged.entries[1].time, merged.entries[2].time);
    }

    #[test]
    fn test_merge_with_empty_event_log() {
        let system = parse("03-18 10:00:01.000   1   1 I A: s1", LogSource::System);
        let merged = merge(&system, &Logcat::default());
        assert_eq!(merged, system);
    }

    #[test]
    fn test_interesting_lines() {
        let log = parse(
            "--------- beginning of main
03-18 10:00:01.000   1   1 E ActivityManager: ANR in com.example.app
03-18 10:00:01.000   1   1 E ActivityManager: PID: 3",
            LogSource::System,
        );
        let lines = interesting_lines(&log);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].is_buffer_begin());
        assert_eq!(lines[1].message, "ANR in com.example.app");
    }

    #[test]
    fn test_mark_regions() {
        let mut log = parse(
            "03-18 10:00:00.000   1   1 I A: before
03-18 10:00:03.000   1   1 I A: during
03-18 10:00:05.500   1   1 W InputDispatcher: Application is not responding: Window{1}.  It has been 5000.0ms since event, 5000.0ms since wait started.  Reason: x
03-18 10:00:06.000   1   1 I A: after",
            LogSource::System,
        );
        mark_anr_regions(&mut log);
        let flags: Vec<bool> = log.entries.iter().map(|e| e.region_anr).collect();
        assert_eq!(flags, vec![false, true, false, false]);

        mark_bugreport_region(
            &mut log,
            parse_timestamp("2016-03-18 10:00:05.000"),
            parse_timestamp("2016-03-18 10:00:10.000"),
        );
        let flags: Vec<bool> = log.entries.iter().map(|e| e.region_bugreport).collect();
        assert_eq!(flags, vec![false, false, true, true]);
    }

    #[test]
    fn test_synthetic_event_marker_has_no_line() {
        let system = parse("03-18 10:00:01.000   1   1 I A: s1", LogSource::System);
        let event = parse("03-18 10:00:02.000   1   1 I am_proc_start: e2", LogSource::Event);
        let merged = merge(&system, &event);
        assert!(merged.entries[1].is_buffer_begin());
        assert_eq!(merged.entries[1].lineno, 0);
        assert_eq!(merged.entries[2].lineno, 1);
    }

    #[test]
    fn test_mark_processes_and_threads() {
        let mut log = parse(
            "--------- beginning of main
03-18 10:00:01.000  1234  1240 I art     : known thread
03-18 10:00:02.000  1234  9999 I art     : unknown thread
03-18 10:00:03.000    77    77 I Zygote  : unknown process",
            LogSource::System,
        );
        let mut known = BTreeMap::new();
        known.insert(
            1234,
            ProcessInfo {
                pid: 1234,
                cmd_line: "com.example.app".to_string(),
                threads: BTreeMap::from([(1240, "HeapTaskDaemon".to_string())]),
            },
        );
        mark_processes_and_threads(&mut log, &known);

        let named: Vec<(Option<&str>, Option<&str>)> = log
            .entries
            .iter()
            .map(|e| (e.process.as_deref(), e.thread.as_deref()))
            .collect();
        assert_eq!(
            named,
            vec![
                (None, None),
                (Some("com.example.app"), Some("HeapTaskDaemon")),
                (Some("com.example.app"), None),
                (None, None),
            ]
        );
    }

    #[test]
    fn test_huge_dispatcher_wait_marks_nothing() {
        let mut log = parse(
            "03-18 10:00:00.000   1   1 I A: before
03-18 10:00:05.500   1   1 W InputDispatcher: Application is not responding: Window{1}.  It has been 99999999999999999999999ms since event, 99999999999999999999999ms since wait started.  Reason: x",
            LogSource::System,
        );
        mark_anr_regions(&mut log);
        assert!(log.entries.iter().all(|e| !e.region_anr));
    }
}
