use std::fs;
use std::path::Path;

use chrono::Duration;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BugreportError, Result};
use crate::parsers::logcat_parser::LogEntry;
use crate::timing::{parse_duration, Timestamp, MAX_DURATION_SECS};

// ============================================================================
// SIGNAL TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Watchdog,
    LockContention,
    BinderStall,
    GcPause,
    SlowMainThread,
    LowMemory,
    Other,
}

impl SignalKind {
    pub fn label(&self) -> &'static str {
        match self {
            SignalKind::Watchdog => "watchdog",
            SignalKind::LockContention => "lock contention",
            SignalKind::BinderStall => "binder stall",
            SignalKind::GcPause => "GC pause",
            SignalKind::SlowMainThread => "slow main thread",
            SignalKind::LowMemory => "low memory",
            SignalKind::Other => "other",
        }
    }
}

/// One rule of the inspector, as written in a signals file.
///
/// `tag` and `pattern` are regular expressions matched against a log
/// entry's tag and message. `explanation` may refer to the pattern's capture
/// groups as `$1` or `${name}`. When `min_duration_ms` is set, the pattern
/// must capture a `duration` group (and optionally a `unit` of `us`, `ms`
/// or `s`, defaulting to `ms`) and shorter matches are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRule {
    pub name: String,
    pub kind: SignalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub pattern: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<f64>,
}

/// Loaded from JSON with `--signals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorConfig {
    /// How far before the hang to look for causes.
    #[serde(default = "default_lookback_seconds")]
    pub lookback_seconds: u64,
    /// Highest priority first.
    #[serde(default = "default_signals")]
    pub signals: Vec<SignalRule>,
}

fn default_lookback_seconds() -> u64 {
    30
}

fn rule(name: &str, kind: SignalKind, tag: &str, pattern: &str, explanation: &str, min_duration_ms: Option<f64>) -> SignalRule {
    SignalRule {
        name: name.to_string(),
        kind,
        tag: Some(tag.to_string()),
        pattern: pattern.to_string(),
        explanation: explanation.to_string(),
        min_duration_ms,
    }
}

fn default_signals() -> Vec<SignalRule> {
    vec![
        rule(
            "watchdog",
            SignalKind::Watchdog,
            r"^Watchdog$",
            r"(?P<what>\*\*\* WATCHDOG KILLING SYSTEM PROCESS.*|Blocked in .*)",
            "system_server watchdog: ${what}",
            None,
        ),
        rule(
            "lock_contention",
            SignalKind::LockContention,
            r"^(?:art|dalvikvm)$",
            r"Long monitor contention with owner (?P<owner>.+?) \(\d+\).* (?:in|blocking from) (?P<waiter>.+?) for (?P<duration>\d+(?:\.\d+)?)(?P<unit>us|ms|s)\b",
            "${waiter} waited ${duration}${unit} for a lock held by ${owner}",
            Some(100.0),
        ),
        rule(
            "binder_sample",
            SignalKind::BinderStall,
            r"^binder_sample$",
            r"^\[(?P<interface>[^,\]]+),\d+,(?P<duration>\d+),(?P<caller>[^,\]]*)",
            "binder call to ${interface} from ${caller} took ${duration}ms",
            Some(200.0),
        ),
        rule(
            "binder_failure",
            SignalKind::BinderStall,
            r"^(?:Binder|BinderProxy|JavaBinder|IPCThreadState)$",
            r"(?P<what>(?i:binder transaction failed|binder transaction failure|transaction timed out).*)",
            "binder trouble: ${what}",
            None,
        ),
        rule(
            "gc_pause",
            SignalKind::GcPause,
            r"^(?:art|dalvikvm)$",
            r"(?P<gc>.+? GC|GC_\w+) freed .*total (?P<duration>\d+(?:\.\d+)?)(?P<unit>us|ms|s)\b",
            "${gc} took ${duration}${unit}",
            Some(100.0),
        ),
        rule(
            "blocking_gc",
            SignalKind::GcPause,
            r"^(?:art|dalvikvm)$",
            r"(?:Starting a|Waiting for a) blocking GC (?P<gc>\w+)",
            "a blocking ${gc} GC held up allocation",
            None,
        ),
        rule(
            "slow_main_thread",
            SignalKind::SlowMainThread,
            r"^(?:Looper|Choreographer)$",
            r"(?P<what>Slow (?:dispatch|delivery|Looper).*|Skipped \d+ frames!.*)",
            "main thread stalled: ${what}",
            None,
        ),
        rule(
            "low_memory",
            SignalKind::LowMemory,
            r"^(?:lowmemorykiller|lmkd|ActivityManager)$",
            r"(?P<what>Low on memory.*|Kill(?:ing)? '?[\w.:]+'? \(\d+\).*)",
            "memory pressure: ${what}",
            None,
        ),
    ]
}

impl Default for InspectorConfig {
    fn default() -> Self {
        InspectorConfig {
            lookback_seconds: default_lookback_seconds(),
            signals: default_signals(),
        }
    }
}

impl InspectorConfig {
    /// Loads and validates a signals file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| BugreportError::io(path, e))?;
        let config = Self::from_json(&contents).map_err(|e| BugreportError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.compile().map_err(|e| match e {
            BugreportError::InvalidSignal { name, message } => BugreportError::Config {
                path: path.to_path_buf(),
                message: format!("signal {}: {}", name, message),
            },
            e @ BugreportError::LookbackOutOfRange(_) => BugreportError::Config {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// The look-back, capped at `MAX_DURATION_SECS`.
    pub fn lookback(&self) -> Duration {
        Duration::seconds(self.lookback_seconds.min(MAX_DURATION_SECS as u64) as i64)
    }

    /// Checks the look-back and compiles every rule, in priority order.
    pub fn compile(&self) -> Result<Vec<Signal>> {
        if self.lookback_seconds > MAX_DURATION_SECS as u64 {
            return Err(BugreportError::LookbackOutOfRange(self.lookback_seconds));
        }
        self.signals.iter().map(Signal::compile).collect()
    }
}

// ============================================================================
// COMPILED SIGNALS
// ============================================================================

#[derive(Debug, Clone)]
pub struct Signal {
    pub rule: SignalRule,
    tag: Option<Regex>,
    pattern: Regex,
}

impl Signal {
    pub fn compile(rule: &SignalRule) -> Result<Self> {
        let invalid = |e: regex::Error| BugreportError::InvalidSignal {
            name: rule.name.clone(),
            message: e.to_string(),
        };
        let tag = rule.tag.as_deref().map(Regex::new).transpose().map_err(invalid)?;
        let pattern = Regex::new(&rule.pattern).map_err(invalid)?;
        Ok(Signal {
            rule: rule.clone(),
            tag,
            pattern,
        })
    }

    /// The explanation for an entry this signal matches.
    pub fn explain(&self, entry: &LogEntry) -> Option<String> {
        if entry.is_buffer_begin() {
            return None;
        }
        if let Some(tag) = &self.tag {
            if !tag.is_match(&entry.tag) {
                return None;
            }
        }
        let caps = self.pattern.captures(&entry.message)?;

        if let Some(min) = self.rule.min_duration_ms {
            let value = caps.name("duration")?.as_str();
            let unit = caps.name("unit").map_or("ms", |u| u.as_str());
            let duration = parse_duration(value, unit)?;
            if (duration.num_microseconds()? as f64) < min * 1_000.0 {
                return None;
            }
        }

        let mut explanation = String::new();
        caps.expand(&self.rule.explanation, &mut explanation);
        Some(explanation)
    }
}

// ============================================================================
// DIAGNOSIS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cause {
    pub signal: String,
    pub kind: SignalKind,
    pub description: String,
    pub lineno: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub signal: String,
    pub kind: SignalKind,
    pub description: String,
    pub entry: LogEntry,
}

/// Looks for signals in `[begin, end]`. The nearest match before `end` is the
/// cause; ties on one line go to the higher priority signal. Evidence is
/// every match, earliest first.
pub fn diagnose(
    signals: &[Signal],
    entries: &[LogEntry],
    begin: Timestamp,
    end: Timestamp,
) -> (Option<Cause>, Vec<Evidence>) {
    let mut evidence = Vec::new();

    for entry in entries {
        let in_range = entry.time.map_or(false, |t| t >= begin && t <= end);
        if !in_range {
            continue;
        }
        if let Some((signal, description)) = signals
            .iter()
            .find_map(|s| s.explain(entry).map(|d| (s, d)))
        {
            evidence.push(Evidence {
                signal: signal.rule.name.clone(),
                kind: signal.rule.kind,
                description,
                entry: entry.clone(),
            });
        }
    }

    // Entries are not guaranteed sorted; order evidence by time, then file.
    evidence.sort_by_key(|e| (e.entry.time, e.entry.lineno));

    let cause = evidence.last().map(|e| Cause {
        signal: e.signal.clone(),
        kind: e.kind,
        description: e.description.clone(),
        lineno: e.entry.lineno,
        time: e.entry.time,
    });

    (cause, evidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::Line;
    use crate::parsers::logcat_parser::parse_log_line;
    use crate::timing::{parse_timestamp, ReferenceDate};

    fn entry(lineno: usize, text: &str) -> LogEntry {
        parse_log_line(&Line::new(lineno, text), ReferenceDate { year: 2016, month: 3 }).unwrap()
    }

    fn compile_defaults() -> Vec<Signal> {
        InspectorConfig::default().compile().unwrap()
    }

    #[test]
    fn test_default_signals_compile() {
        let config = InspectorConfig::default();
        assert_eq!(config.compile().unwrap().len(), config.signals.len());
        assert_eq!(config.lookback(), Duration::seconds(30));
    }

    #[test]
    fn test_gc_pause_respects_min_duration() {
        let signals = compile_defaults();
        let gc = signals.iter().find(|s| s.rule.name == "gc_pause").unwrap();

        let slow = entry(1, "03-18 14:21:40.000  1234  1240 I art     : Background concurrent copying GC freed 12345(1MB) AllocSpace objects, 0(0B) LOS objects, 50% free, 8MB/16MB, paused 63us total 250.5ms");
        assert_eq!(gc.explain(&slow).unwrap(), "Background concurrent copying GC took 250.5ms");

        let fast = entry(2, "03-18 14:21:40.000  1234  1240 I art     : Background concurrent copying GC freed 1(1B) AllocSpace objects, paused 63us total 12.5ms");
        assert!(gc.explain(&fast).is_none());
    }

    #[test]
    fn test_lock_contention_explanation() {
        let signals = compile_defaults();
        let e = entry(3, "03-18 14:21:44.000   612   630 W art     : Long monitor contention with owner Binder:612_3 (640) at void com.android.server.Foo.bar()(Foo.java:12) waiters=0 in void com.android.server.Foo.baz() for 1.2s");
        let signal = signals.iter().find(|s| s.explain(&e).is_some()).unwrap();
        assert_eq!(signal.rule.kind, SignalKind::LockContention);
        assert_eq!(
            signal.explain(&e).unwrap(),
            "void com.android.server.Foo.baz() waited 1.2s for a lock held by Binder:612_3"
        );
    }

    #[test]
    fn test_diagnose_picks_nearest_match() {
        let signals = compile_defaults();
        let entries = vec![
            entry(1, "03-18 14:21:10.000  1234  1240 I art     : Starting a blocking GC Alloc"),
            entry(2, "03-18 14:21:30.000  1234  1240 I art     : Waiting for a blocking GC Explicit"),
            entry(3, "03-18 14:21:40.000  1234  1234 I Choreographer: Skipped 120 frames!  The application may be doing too much work on its main thread."),
            entry(4, "03-18 14:21:41.000  1234  1234 I Zygote  : nothing to see"),
            entry(5, "03-18 14:21:50.000  1234  1234 I Choreographer: Skipped 30 frames!  after the hang"),
        ];
        let begin = parse_timestamp("2016-03-18 14:21:15.000").unwrap();
        let end = parse_timestamp("2016-03-18 14:21:45.000").unwrap();

        let (cause, evidence) = diagnose(&signals, &entries, begin, end);
        let cause = cause.unwrap();
        assert_eq!(cause.kind, SignalKind::SlowMainThread);
        assert_eq!(cause.lineno, 3);

        let linenos: Vec<usize> = evidence.iter().map(|e| e.entry.lineno).collect();
        assert_eq!(linenos, vec![2, 3]);
        assert_eq!(evidence[0].description, "a blocking Explicit GC held up allocation");
    }

    #[test]
    fn test_diagnose_without_match() {
        let signals = compile_defaults();
        let entries = vec![entry(1, "03-18 14:21:40.000  1234  1234 I Zygote  : nothing to see")];
        let begin = parse_timestamp("2016-03-18 14:21:15.000").unwrap();
        let end = parse_timestamp("2016-03-18 14:21:45.000").unwrap();

        let (cause, evidence) = diagnose(&signals, &entries, begin, end);
        assert!(cause.is_none());
        assert!(evidence.is_empty());
    }

    #[test]
    fn test_config_from_json_uses_defaults() {
        let config = InspectorConfig::from_json(r#"{"lookback_seconds": 10}"#).unwrap();
        assert_eq!(config.lookback_seconds, 10);
        assert_eq!(config.signals, InspectorConfig::default().signals);

        let custom = InspectorConfig::from_json(
            r#"{"signals": [{"name": "strict_mode", "kind": "other", "tag": "^StrictMode$", "pattern": "policy=(\\d+)", "explanation": "StrictMode violation $1"}]}"#,
        )
        .unwrap();
        assert_eq!(custom.lookback_seconds, 30);
        assert_eq!(custom.signals.len(), 1);
        let signals = custom.compile().unwrap();
        let e = entry(1, "03-18 14:21:40.000  1234  1234 D StrictMode: StrictMode policy violation; ~duration=12 ms: policy=31");
        assert_eq!(signals[0].explain(&e).unwrap(), "StrictMode violation 31");
    }

    #[test]
    fn test_config_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        let bad_regex = dir.path().join("bad_regex.json");
        fs::write(
            &bad_regex,
            r#"{"signals": [{"name": "broken", "kind": "other", "pattern": "(", "explanation": "x"}]}"#,
        )
        .unwrap();
        match InspectorConfig::from_file(&bad_regex) {
            Err(BugreportError::Config { path, message }) => {
                assert_eq!(path, bad_regex);
                assert!(message.starts_with("signal broken:"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let bad_json = dir.path().join("bad.json");
        fs::write(&bad_json, "{").unwrap();
        assert!(matches!(InspectorConfig::from_file(&bad_json), Err(BugreportError::Config { .. })));

        let missing = dir.path().join("missing.json");
        assert!(matches!(InspectorConfig::from_file(&missing), Err(BugreportError::Io { .. })));
    }

    #[test]
    fn test_lookback_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lookback.json");
        fs::write(&path, r#"{"lookback_seconds": 18446744073709551615}"#).unwrap();
        match InspectorConfig::from_file(&path) {
            Err(BugreportError::Config { message, .. }) => assert!(message.contains("out of range")),
            other => panic!("unexpected result: {:?}", other),
        }

        let config = InspectorConfig {
            lookback_seconds: u64::MAX,
            ..InspectorConfig::default()
        };
        assert!(matches!(config.compile(), Err(BugreportError::LookbackOutOfRange(u64::MAX))));
        assert_eq!(config.lookback(), Duration::seconds(MAX_DURATION_SECS));
    }
}
