//! Ties the pipeline together: load, parse, inspect, write.

use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use crate::error::{BugreportError, Result};
use crate::html_output::HtmlRenderer;
use crate::inspector::{Inspector, InspectorConfig};
use crate::lines::{read_lines, Lines};
use crate::options::{parse_args, Invocation, Options};
use crate::parsers::bugreport_parser::{Bugreport, BugreportParser};
use crate::parsers::logcat_parser::{LogSource, LogcatParser};
use crate::parsers::monkey_parser::MonkeyParser;
use crate::timing::format_duration;

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub anr_found: bool,
    pub cause_found: bool,
    pub html: Option<PathBuf>,
    pub json: Option<PathBuf>,
}

/// Reads and analyses everything named by `options` without writing output.
pub fn analyse(options: &Options) -> Result<Bugreport> {
    // Configuration errors should surface before the slow part.
    let config = match &options.signals {
        Some(path) => {
            info!("Loading signals from {}", path.display());
            InspectorConfig::from_file(path)?
        }
        None => InspectorConfig::default(),
    };
    let inspector = Inspector::new(&config)?;

    info!("Reading {}", options.bugreport.display());
    let lines = read_lines(&options.bugreport)?;
    let mut bugreport = BugreportParser::new().parse(&mut Lines::new(&lines));
    info!(
        "Parsed {} lines, {} sections, {} log entries",
        lines.len(),
        bugreport.sections.len(),
        bugreport.system_log.entries.len() + bugreport.event_log.entries.len()
    );

    if let Some(path) = &options.monkey {
        info!("Reading monkey log {}", path.display());
        let lines = read_lines(path)?;
        MonkeyParser::new()
            .parse(&mut bugreport, &mut Lines::new(&lines))
            .map_err(|e| match e {
                BugreportError::NotMonkeyLog(reason) => {
                    BugreportError::NotMonkeyLog(format!("{}: {}", path.display(), reason))
                }
                other => other,
            })?;
    }

    if let Some(path) = &options.logcat {
        info!("Reading logcat {}", path.display());
        let lines = read_lines(path)?;
        let logcat = LogcatParser::new(bugreport.reference_date(), LogSource::Logcat)
            .parse(&mut Lines::new(&lines));
        if logcat.is_empty() {
            warn!("{} has no log entries", path.display());
        }
        bugreport.logcat = Some(logcat);
    }

    inspector.inspect(&mut bugreport);
    Ok(bugreport)
}

fn write_json(bugreport: &Bugreport, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|e| BugreportError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, bugreport)
        .map_err(|e| BugreportError::io(path, io::Error::from(e)))?;
    writer.flush().map_err(|e| BugreportError::io(path, e))?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// The whole pipeline. Output is only written once the analysis succeeded.
pub fn run(options: &Options) -> Result<Outcome> {
    let start = Instant::now();
    let bugreport = analyse(options)?;
    let mut outcome = Outcome {
        anr_found: bugreport.anr.is_some(),
        cause_found: bugreport.anr.as_ref().map_or(false, |a| a.cause.is_some()),
        ..Outcome::default()
    };

    if let Some(path) = &options.json {
        write_json(&bugreport, path)?;
        outcome.json = Some(path.clone());
    }

    match &bugreport.anr {
        Some(anr) => {
            info!("ANR in {}", anr.process_name);
            if let Some(path) = &options.html {
                HtmlRenderer::new().render(&bugreport, path)?;
                outcome.html = Some(path.clone());
            }
        }
        None => eprintln!("No ANR found in {}", options.bugreport.display()),
    }

    let elapsed = chrono::Duration::from_std(start.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
    info!("Done in {}", format_duration(elapsed));
    Ok(outcome)
}

/// Runs and reports any error on stderr. Returns the process exit status.
pub fn execute(options: &Options) -> u8 {
    match run(options) {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// Parses `args` (program name first) and runs. Returns the exit status.
pub fn main_with_args<I, T>(args: I) -> u8
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match parse_args(args) {
        Ok(Invocation::Run(options)) => execute(&options),
        Ok(Invocation::Info(text)) => {
            print!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::bugreport_parser::tests::REPORT;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const NO_ANR: &str = "== dumpstate: 2016-03-18 14:22:05
------ SYSTEM LOG (logcat -v threadtime -d *:v) ------
03-18 14:21:30.000  1000   612   630 I ActivityManager: Start proc com.example.app
------ 0.100s was the duration of 'SYSTEM LOG' ------
";

    fn workspace(report: &str) -> (TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bugreport.txt");
        fs::write(&path, report).unwrap();
        (dir, path)
    }

    fn arg(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_usage_errors_exit_1() {
        assert_eq!(main_with_args(["bugreport", "--bogus", "foo", "report.txt"]), 1);
        assert_eq!(main_with_args(["bugreport", "--monkey", "m.txt"]), 1);
        assert_eq!(main_with_args(["bugreport"]), 1);
    }

    #[test]
    fn test_help_exits_0() {
        assert_eq!(main_with_args(["bugreport", "--help"]), 0);
    }

    #[test]
    fn test_missing_bugreport_exits_1() {
        let dir = tempdir().unwrap();
        let html = dir.path().join("out.html");
        let missing = dir.path().join("missing.txt");
        assert_eq!(
            main_with_args(["bugreport".to_string(), "--html".to_string(), arg(&html), arg(&missing)]),
            1
        );
        assert!(!html.exists());
    }

    #[test]
    fn test_writes_html_and_json() {
        let (dir, report) = workspace(REPORT);
        let html = dir.path().join("anr.html");
        let json = dir.path().join("anr.json");
        let options = Options {
            bugreport: report,
            monkey: None,
            html: Some(html.clone()),
            logcat: None,
            json: Some(json.clone()),
            signals: None,
            verbose: false,
        };

        let outcome = run(&options).unwrap();
        assert!(outcome.anr_found);
        assert!(outcome.cause_found);
        assert_eq!(outcome.html, Some(html.clone()));

        assert!(fs::read_to_string(&html).unwrap().contains("ANR in com.example.app"));
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["anr"]["process_name"], "com.example.app");
        assert_eq!(value["anr"]["cause"]["kind"], "gc_pause");
    }

    #[test]
    fn test_no_anr_writes_no_html() {
        let (dir, report) = workspace(NO_ANR);
        let html = dir.path().join("anr.html");
        let json = dir.path().join("anr.json");
        let status = main_with_args([
            "bugreport".to_string(),
            "--html".to_string(),
            arg(&html),
            "--json".to_string(),
            arg(&json),
            arg(&report),
        ]);

        assert_eq!(status, 0);
        assert!(!html.exists());
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert!(value["anr"].is_null());
    }

    #[test]
    fn test_monkey_log_is_merged() {
        let (dir, report) = workspace(REPORT);
        let monkey = dir.path().join("monkey.txt");
        fs::write(&monkey, ":Monkey: seed=42 count=10\n:Sending Touch (ACTION_DOWN): 0:(1.0,2.0)\nEvents injected: 10\n").unwrap();
        let options = Options {
            bugreport: report,
            monkey: Some(monkey),
            html: None,
            logcat: None,
            json: None,
            signals: None,
            verbose: false,
        };

        let bugreport = analyse(&options).unwrap();
        let log = bugreport.monkey.unwrap();
        assert_eq!(log.seed, Some(42));
        assert_eq!(log.events_injected, Some(10));
        assert_eq!(bugreport.anr.unwrap().process_name, "com.example.app");
    }

    #[test]
    fn test_not_a_monkey_log_names_the_file() {
        let (dir, report) = workspace(REPORT);
        let monkey = dir.path().join("notes.txt");
        fs::write(&monkey, "hello\nworld\n").unwrap();
        let options = Options {
            bugreport: report,
            monkey: Some(monkey),
            html: None,
            logcat: None,
            json: None,
            signals: None,
            verbose: false,
        };

        match analyse(&options).unwrap_err() {
            BugreportError::NotMonkeyLog(reason) => assert!(reason.contains("notes.txt")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_supplied_logcat_replaces_merged_log() {
        let (dir, report) = workspace(REPORT);
        let logcat = dir.path().join("logcat.txt");
        fs::write(
            &logcat,
            "03-18 14:21:45.000  1000   612   640 I art     : Starting a blocking GC Alloc\n",
        )
        .unwrap();
        let options = Options {
            bugreport: report,
            monkey: None,
            html: None,
            logcat: Some(logcat),
            json: None,
            signals: None,
            verbose: false,
        };

        let bugreport = analyse(&options).unwrap();
        let log = bugreport.logcat.as_ref().unwrap();
        assert_eq!(log.entries.len(), 1);
        assert_eq!(log.entries[0].source, LogSource::Logcat);
        let cause = bugreport.anr.unwrap().cause.unwrap();
        assert_eq!(cause.lineno, 1);
    }

    #[test]
    fn test_bad_signals_file_writes_nothing() {
        let (dir, report) = workspace(REPORT);
        let signals = dir.path().join("signals.json");
        fs::write(
            &signals,
            r#"{"lookback_seconds": 10, "signals": [{"name": "broken", "kind": "other", "pattern": "(", "explanation": "x"}]}"#,
        )
        .unwrap();
        let html = dir.path().join("anr.html");
        let status = main_with_args([
            "bugreport".to_string(),
            "--signals".to_string(),
            arg(&signals),
            "--html".to_string(),
            arg(&html),
            arg(&report),
        ]);

        assert_eq!(status, 1);
        assert!(!html.exists());
    }
}
