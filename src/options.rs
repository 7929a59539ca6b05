use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

use crate::error::{BugreportError, Result};

pub const USAGE: &str =
    "usage: bugreport [--monkey MONKEYLOG] [--html HTML] [--logcat LOGCAT] [--json JSON] [--signals SIGNALS] [-v] BUGREPORT";

/// Finds the likely cause of an ANR in an Android bugreport.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "bugreport", version, about, long_about = None)]
pub struct Options {
    /// The bugreport to analyse (plain text or the zip from `adb bugreport`)
    #[arg(value_name = "BUGREPORT")]
    pub bugreport: PathBuf,

    /// Monkey log from the run that produced the bugreport
    #[arg(long, value_name = "MONKEYLOG")]
    pub monkey: Option<PathBuf>,

    /// Write the HTML report here
    #[arg(long, value_name = "HTML")]
    pub html: Option<PathBuf>,

    /// A separately captured logcat, used instead of the bugreport's logs
    #[arg(long, value_name = "LOGCAT")]
    pub logcat: Option<PathBuf>,

    /// Write the analysed bugreport as JSON here
    #[arg(long, value_name = "JSON")]
    pub json: Option<PathBuf>,

    /// JSON file with the look-back window and the signals to search for
    #[arg(long, value_name = "SIGNALS")]
    pub signals: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(Options),
    /// `--help` or `--version`: print the text and succeed.
    Info(String),
}

/// Parses the full argument list, program name first. Anything clap rejects
/// becomes a one-line `Usage` error.
pub fn parse_args<I, T>(args: I) -> Result<Invocation>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Options::try_parse_from(args) {
        Ok(options) => Ok(Invocation::Run(options)),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            Ok(Invocation::Info(e.render().to_string()))
        }
        Err(e) => {
            let rendered = e.render().to_string();
            let reason = rendered
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ")
                .trim()
                .to_string();
            Err(BugreportError::Usage(format!("{}\n{}", reason, USAGE)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> Options {
        match parse_args(args.iter().copied()).unwrap() {
            Invocation::Run(options) => options,
            other => panic!("expected options, got {:?}", other),
        }
    }

    #[test]
    fn test_positional_only() {
        let options = run(&["bugreport", "report.txt"]);
        assert_eq!(options.bugreport, PathBuf::from("report.txt"));
        assert!(options.monkey.is_none());
        assert!(options.html.is_none());
        assert!(!options.verbose);
    }

    #[test]
    fn test_flags_in_any_order() {
        let a = run(&["bugreport", "--html", "out.html", "--monkey", "m.txt", "report.txt"]);
        let b = run(&["bugreport", "report.txt", "--monkey", "m.txt", "--html", "out.html"]);
        assert_eq!(a, b);
        assert_eq!(a.monkey, Some(PathBuf::from("m.txt")));
        assert_eq!(a.html, Some(PathBuf::from("out.html")));
    }

    #[test]
    fn test_extra_flags() {
        let options = run(&[
            "bugreport",
            "-v",
            "--logcat",
            "logcat.txt",
            "--json",
            "out.json",
            "--signals",
            "signals.json",
            "report.zip",
        ]);
        assert!(options.verbose);
        assert_eq!(options.logcat, Some(PathBuf::from("logcat.txt")));
        assert_eq!(options.json, Some(PathBuf::from("out.json")));
        assert_eq!(options.signals, Some(PathBuf::from("signals.json")));
    }

    #[test]
    fn test_unknown_flag_is_a_usage_error() {
        let err = parse_args(["bugreport", "--bogus", "foo", "report.txt"]).unwrap_err();
        match err {
            BugreportError::Usage(message) => {
                assert!(message.contains("--bogus"));
                assert!(message.ends_with(USAGE));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_bugreport_is_a_usage_error() {
        let err = parse_args(["bugreport", "--monkey", "m.txt"]).unwrap_err();
        assert!(matches!(err, BugreportError::Usage(_)));
    }

    #[test]
    fn test_help_is_not_an_error() {
        match parse_args(["bugreport", "--help"]).unwrap() {
            Invocation::Info(text) => assert!(text.contains("--monkey")),
            other => panic!("expected help, got {:?}", other),
        }
    }
}
