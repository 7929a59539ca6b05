pub mod anr_parser;
pub mod bugreport_parser;
pub mod header_parser;
pub mod logcat_parser;
pub mod monkey_parser;
pub mod vm_traces_parser;

pub use anr_parser::{Anr, AnrParser, AnrWindow, WindowSource};
pub use bugreport_parser::{Bugreport, BugreportParser, ProcessInfo, SectionInfo};
pub use header_parser::{DumpstateHeader, HeaderParser};
pub use logcat_parser::{LogEntry, LogLevel, LogSource, Logcat, LogcatParser};
pub use monkey_parser::{MonkeyLog, MonkeyParser};
pub use vm_traces_parser::{ThreadSnapshotParser, VmTraces, VmTracesParser};
