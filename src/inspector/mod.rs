//! Rule-based analysis of a parsed bugreport: works out what the threads
//! were doing and looks back through the log for the likely cause of the ANR.

pub mod deadlock;
pub mod logcat;
pub mod signals;
pub mod threads;

use chrono::Duration;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::parsers::bugreport_parser::Bugreport;

pub use signals::{Cause, Evidence, InspectorConfig, Signal, SignalKind, SignalRule};

pub struct Inspector {
    signals: Vec<Signal>,
    lookback: Duration,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new(&InspectorConfig::default()).expect("built-in signals must compile")
    }
}

impl Inspector {
    pub fn new(config: &InspectorConfig) -> Result<Self> {
        Ok(Inspector {
            signals: config.compile()?,
            lookback: config.lookback(),
        })
    }

    /// Annotates the bugreport in place. Does nothing without an ANR.
    pub fn inspect(&self, bugreport: &mut Bugreport) {
        if bugreport.anr.is_none() {
            debug!("no ANR to inspect");
            return;
        }

        self.inspect_threads(bugreport);
        self.inspect_logs(bugreport);
        self.diagnose(bugreport);
    }

    fn inspect_threads(&self, bugreport: &mut Bugreport) {
        let Bugreport {
            known_processes,
            vm_traces_just_now,
            vm_traces_last_anr,
            anr,
            ..
        } = bugreport;

        let anr_traces = anr.as_mut().and_then(|a| a.vm_traces.as_mut());
        for traces in [anr_traces, vm_traces_just_now.as_mut(), vm_traces_last_anr.as_mut()]
            .into_iter()
            .flatten()
        {
            threads::collect_known_processes(known_processes, traces);
            threads::inspect_processes(traces);
        }

        if let Some(anr) = anr.as_mut() {
            let pid = anr.pid;
            if let Some(traces) = anr.vm_traces.as_mut() {
                if let Some(pid) = pid {
                    traces.deadlock = deadlock::detect_deadlock(traces, pid);
                    if !traces.deadlock.is_empty() {
                        info!("Deadlock involving {} threads", traces.deadlock.len());
                    }
                }
                traces.interesting_processes = threads::interesting_processes(traces, pid);
            }
        }
    }

    fn inspect_logs(&self, bugreport: &mut Bugreport) {
        logcat::invent_times(&mut bugreport.system_log.entries);
        logcat::invent_times(&mut bugreport.event_log.entries);

        let log = match bugreport.logcat.take() {
            Some(mut supplied) => {
                logcat::invent_times(&mut supplied.entries);
                supplied
            }
            None => logcat::merge(&bugreport.system_log, &bugreport.event_log),
        };
        let log = bugreport.logcat.insert(log);

        logcat::mark_processes_and_threads(log, &bugreport.known_processes);
        bugreport.interesting_log_lines = logcat::interesting_lines(log);
        logcat::mark_anr_regions(log);
        logcat::mark_bugreport_region(log, bugreport.start_time, bugreport.end_time);
    }

    fn diagnose(&self, bugreport: &mut Bugreport) {
        let window = bugreport
            .anr
            .as_ref()
            .and_then(|anr| anr.window.as_ref().map(|w| (w.begin, w.end)).or(anr.logged_at.map(|t| (t, t))));

        let (cause, evidence) = match window {
            Some((begin, end)) => {
                let begin = match end.checked_sub_signed(self.lookback) {
                    Some(earliest) => begin.min(earliest),
                    None => {
                        warn!("look-back reaches past the earliest timestamp");
                        begin
                    }
                };
                signals::diagnose(&self.signals, &bugreport.log().entries, begin, end)
            }
            None => {
                debug!("ANR has no time; nothing to look back from");
                (None, Vec::new())
            }
        };

        if let Some(anr) = bugreport.anr.as_mut() {
            match &cause {
                Some(cause) => info!("Likely cause: {}", cause.description),
                None => info!("Cause unknown"),
            }
            anr.cause = cause;
            anr.evidence = evidence;
        }
    }
}
