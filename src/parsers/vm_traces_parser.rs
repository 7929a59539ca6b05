use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::lines::{Line, Lines};
use crate::timing::{parse_timestamp, Timestamp};

// ============================================================================
// STACK STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    Locked,
    Waiting,
    Sleeping,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSnapshot {
    pub kind: LockKind,
    /// `None` for "waiting to lock an unknown object".
    pub address: Option<String>,
    pub package: Option<String>,
    pub class: Option<String>,
    /// Thread id (the VM's `tid`, not `sysTid`) of the owner, when reported.
    pub owner_tid: Option<u32>,
}

impl LockSnapshot {
    pub fn qualified_class(&self) -> String {
        match (&self.package, &self.class) {
            (Some(p), Some(c)) => format!("{}.{}", p, c),
            (None, Some(c)) => c.clone(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JavaLanguage {
    Java,
    Jni,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaFrame {
    pub text: String,
    pub package: Option<String>,
    pub class: String,
    pub method: String,
    pub source_file: Option<String>,
    pub source_line: Option<i32>,
    pub language: JavaLanguage,
    pub locks: Vec<LockSnapshot>,
}

impl JavaFrame {
    /// "android.os.BinderProxy.transact"
    pub fn qualified_method(&self) -> String {
        match &self.package {
            Some(package) => format!("{}.{}.{}", package, self.class, self.method),
            None => format!("{}.{}", self.class, self.method),
        }
    }

    pub fn is(&self, package: &str, class: &str, method: &str) -> bool {
        self.package.as_deref() == Some(package) && self.class == class && self.method == method
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeFrame {
    pub text: String,
    pub address: String,
    pub library: String,
    pub symbol: Option<String>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelFrame {
    pub text: String,
    pub syscall: String,
    pub offset0: u64,
    pub offset1: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame_type", rename_all = "snake_case")]
pub enum StackFrame {
    Java(JavaFrame),
    Native(NativeFrame),
    Kernel(KernelFrame),
    Other { text: String },
}

impl StackFrame {
    pub fn text(&self) -> &str {
        match self {
            StackFrame::Java(f) => &f.text,
            StackFrame::Native(f) => &f.text,
            StackFrame::Kernel(f) => &f.text,
            StackFrame::Other { text } => text,
        }
    }

    pub fn as_java(&self) -> Option<&JavaFrame> {
        match self {
            StackFrame::Java(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Managed,
    Unmanaged,
}

/// One end of a binder call found on a thread's stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinderCall {
    pub package: Option<String>,
    pub class: String,
    pub method: Option<String>,
}

impl BinderCall {
    /// The interface the call goes through, e.g. "android.app.IActivityManager".
    pub fn interface(&self) -> String {
        match &self.package {
            Some(p) if !p.is_empty() => format!("{}.{}", p, self.class),
            _ => self.class.clone(),
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.method {
            Some(m) if !m.is_empty() => format!("{}.{}", self.interface(), m),
            _ => self.interface(),
        }
    }
}

/// All the locks a thread touches, merged across its frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadLock {
    pub address: Option<String>,
    pub class: String,
    pub kinds: Vec<LockKind>,
    pub owner_tid: Option<u32>,
}

impl ThreadLock {
    pub fn is_blocked(&self) -> bool {
        self.kinds.contains(&LockKind::Blocked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub name: String,
    pub kind: ThreadKind,
    pub daemon: bool,
    pub priority: Option<i32>,
    /// The VM's thread id.
    pub tid: Option<u32>,
    /// The kernel's thread id.
    pub sys_tid: Option<u32>,
    pub vm_state: String,
    pub attributes: Vec<String>,
    pub held_mutexes: Option<String>,
    pub runnable: bool,
    pub frames: Vec<StackFrame>,

    // Filled in by the inspector.
    #[serde(default)]
    pub locks: Vec<ThreadLock>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub interesting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound_binder: Option<BinderCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound_binder: Option<BinderCall>,
}

impl ThreadSnapshot {
    fn new(name: String, kind: ThreadKind) -> Self {
        ThreadSnapshot {
            name,
            kind,
            daemon: false,
            priority: None,
            tid: None,
            sys_tid: None,
            vm_state: String::new(),
            attributes: Vec::new(),
            held_mutexes: None,
            runnable: false,
            frames: Vec::new(),
            locks: Vec::new(),
            blocked: false,
            interesting: false,
            outbound_binder: None,
            inbound_binder: None,
        }
    }

    pub fn is_binder(&self) -> bool {
        self.outbound_binder.is_some() || self.inbound_binder.is_some()
    }

    pub fn java_frames(&self) -> impl Iterator<Item = &JavaFrame> {
        self.frames.iter().filter_map(StackFrame::as_java)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub cmd_line: String,
    /// The dump time exactly as printed.
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<Timestamp>,
    pub threads: Vec<ThreadSnapshot>,
}

impl ProcessSnapshot {
    pub fn thread(&self, name: &str) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.name == name)
    }

    pub fn thread_by_tid(&self, tid: u32) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.tid == Some(tid))
    }
}

/// A thread identified across processes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadRef {
    pub pid: u32,
    pub name: String,
    pub tid: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmTraces {
    pub processes: Vec<ProcessSnapshot>,
    /// Threads forming a wait cycle, filled in by the inspector.
    #[serde(default)]
    pub deadlock: Vec<ThreadRef>,
    /// Copies of processes reduced to their interesting threads.
    #[serde(default)]
    pub interesting_processes: Vec<ProcessSnapshot>,
}

impl VmTraces {
    pub fn process(&self, pid: u32) -> Option<&ProcessSnapshot> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn thread(&self, pid: u32, name: &str) -> Option<&ThreadSnapshot> {
        self.process(pid)?.thread(name)
    }

    /// Thread name → frames for one process.
    pub fn stacks(&self, pid: u32) -> BTreeMap<&str, &[StackFrame]> {
        self.process(pid)
            .map(|p| {
                p.threads
                    .iter()
                    .map(|t| (t.name.as_str(), t.frames.as_slice()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// PATTERNS
// ============================================================================

struct Patterns {
    process_begin: Regex,
    process_end: Regex,
    cmd_line: Regex,
    begin_unmanaged: Regex,
    begin_managed: Regex,
    begin_not_attached: Regex,
    held_mutexes: Regex,
    sys_tid: Regex,
    state_runnable: Regex,
    build_id: Regex,
    native: Regex,
    native_no_loc: Regex,
    kernel: Regex,
    kernel_unknown: Regex,
    java: Regex,
    lock: Regex,
    lock_unknown: Regex,
    no_managed_frames: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("vm traces regex");
        Patterns {
            process_begin: re(r"^----- pid (\d+) at (.*?) -----$"),
            process_end: re(r"^----- end (\d+) -----$"),
            cmd_line: re(r"^Cmd line: (.*)$"),
            begin_unmanaged: re(r#"^"(.*)" sysTid=(\d+)(.*)$"#),
            begin_managed: re(r#"^"(.*)" (.*?) ?prio=(\d+)\s+tid=(\d+)\s*(.*)$"#),
            begin_not_attached: re(r#"^"(.*)" (.*?) ?prio=(\d+)\s+(\(not attached\))$"#),
            held_mutexes: re(r"^\| (held mutexes=\s*(.*))$"),
            sys_tid: re(r"^\| sysTid=(\d+)\b"),
            state_runnable: re(r"^\| state=R\b"),
            build_id: re(r"\s*\(BuildId: [0-9a-fA-F]+\)$"),
            native: re(r"^(?:native: )?#\d+ \S+ ([0-9a-fA-F]+)\s+(\S+)\s+\((.+)\+(\d+)\)"),
            native_no_loc: re(r"^(?:native: )?#\d+ \S+ ([0-9a-fA-F]+)\s+(\S+)(?:\s+\((.*)\))?"),
            kernel: re(r"^kernel: (.*)\+0x([0-9a-fA-F]+)/0x([0-9a-fA-F]+)"),
            kernel_unknown: re(r"^kernel: \(couldn't read /proc/self/task/\d+/stack\)"),
            java: re(r"^at (?:(.+)\.)?([^.]+)\.([^.(]+)\((.*?)(?::(-?\d+))?\)$"),
            lock: re(
                r"^- (locked|waiting on|sleeping on|waiting to lock) <0x([0-9a-fA-F]{1,16})> \(a (?:(.+)\.)?([^.]+?)\)(?: held by thread (\d+))?",
            ),
            lock_unknown: re(r"^- waiting to lock an unknown object"),
            no_managed_frames: re(r"^\(no managed stack frames\)$"),
        }
    })
}

// ============================================================================
// PARSERS
// ============================================================================

/// Parses a "VM TRACES" block: a sequence of per-process dumps.
pub struct VmTracesParser;

impl VmTracesParser {
    pub fn new() -> Self {
        VmTracesParser
    }

    /// Reads every process dump inside the cursor's window.
    pub fn parse(&self, lines: &mut Lines<'_, Line>) -> VmTraces {
        let p = patterns();
        let mut traces = VmTraces::default();

        while let Some(line) = lines.next() {
            let caps = match p.process_begin.captures(&line.text) {
                Some(caps) => caps,
                None => continue,
            };
            let pid: u32 = match caps[1].parse() {
                Ok(pid) => pid,
                Err(_) => {
                    warn!(lineno = line.lineno, "bad pid in process header: {}", line.text);
                    continue;
                }
            };
            let date = caps[2].to_string();

            // The process runs to its end marker, or to the next process if
            // the dump was truncated.
            let start = lines.pos();
            let mut end = lines.end();
            let mut resume = lines.end();
            let mut scan = lines.copy(start, lines.end());
            while let Some(candidate) = scan.next() {
                if p.process_end.is_match(&candidate.text) {
                    end = scan.pos() - 1;
                    resume = scan.pos();
                    break;
                }
                if p.process_begin.is_match(&candidate.text) {
                    warn!(lineno = candidate.lineno, "process {} has no end marker", pid);
                    end = scan.pos() - 1;
                    resume = end;
                    break;
                }
            }

            let mut body = lines.copy(start, end);
            traces.processes.push(self.parse_process(pid, date, &mut body));
            lines.rewind_to(resume);
        }

        traces
    }

    fn parse_process(&self, pid: u32, date: String, lines: &mut Lines<'_, Line>) -> ProcessSnapshot {
        let p = patterns();
        let thread_parser = ThreadSnapshotParser::new();
        let mut process = ProcessSnapshot {
            pid,
            cmd_line: String::new(),
            time: parse_timestamp(&date),
            date,
            threads: Vec::new(),
        };

        while let Some(line) = lines.next() {
            if let Some(caps) = p.cmd_line.captures(&line.text) {
                process.cmd_line = caps[1].trim().to_string();
                continue;
            }
            if !line.text.starts_with('"') {
                continue;
            }

            // A thread runs until the first blank line or the next thread header.
            let start = lines.pos() - 1;
            let mut end = lines.end();
            let mut scan = lines.copy(lines.pos(), lines.end());
            while let Some(candidate) = scan.next() {
                if candidate.text.trim().is_empty() || candidate.text.starts_with('"') {
                    end = scan.pos() - 1;
                    break;
                }
            }

            let mut thread_lines = lines.copy(start, end);
            match thread_parser.parse(&mut thread_lines) {
                Some(thread) => process.threads.push(thread),
                None => warn!(lineno = line.lineno, "unrecognized thread header: {}", line.text),
            }
            lines.rewind_to(end);
        }

        process
    }
}

impl Default for VmTracesParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one thread of a VM traces dump: header, `|` attributes, frames.
pub struct ThreadSnapshotParser;

impl ThreadSnapshotParser {
    pub fn new() -> Self {
        ThreadSnapshotParser
    }

    /// Returns `None` when the first line is not a thread header.
    pub fn parse(&self, lines: &mut Lines<'_, Line>) -> Option<ThreadSnapshot> {
        let p = patterns();
        let first = lines.next()?;
        let mut thread = Self::parse_header(&first.text)?;

        // Attributes
        while let Some(line) = lines.next() {
            let text = line.text.trim();
            if let Some(caps) = p.held_mutexes.captures(text) {
                thread.attributes.push(caps[1].to_string());
                thread.held_mutexes = Some(caps[2].trim().to_string());
            } else if let Some(attr) = text.strip_prefix("| ") {
                thread.attributes.push(attr.to_string());
                if let Some(caps) = p.sys_tid.captures(text) {
                    thread.sys_tid = caps[1].parse().ok();
                }
                if p.state_runnable.is_match(text) {
                    thread.runnable = true;
                }
            } else {
                lines.rewind();
                break;
            }
        }

        // Stack
        while let Some(line) = lines.next() {
            let text = line.text.trim();
            if text.is_empty() {
                break;
            }
            if let Some(lock) = Self::parse_lock(text) {
                match thread.frames.last_mut() {
                    Some(StackFrame::Java(frame)) => frame.locks.push(lock),
                    _ => debug!(lineno = line.lineno, "lock line without a java frame: {}", text),
                }
                continue;
            }
            let frame = Self::parse_frame(text).unwrap_or_else(|| {
                debug!(lineno = line.lineno, "unrecognized stack line: {}", text);
                StackFrame::Other {
                    text: text.to_string(),
                }
            });
            thread.frames.push(frame);
        }

        Some(thread)
    }

    fn parse_header(text: &str) -> Option<ThreadSnapshot> {
        let p = patterns();

        if let Some(caps) = p.begin_unmanaged.captures(text) {
            let mut thread = ThreadSnapshot::new(caps[1].to_string(), ThreadKind::Unmanaged);
            thread.sys_tid = caps[2].parse().ok();
            return Some(thread);
        }
        if let Some(caps) = p.begin_not_attached.captures(text) {
            let mut thread = ThreadSnapshot::new(caps[1].to_string(), ThreadKind::Managed);
            thread.daemon = caps[2].trim() == "daemon";
            thread.priority = caps[3].parse().ok();
            thread.vm_state = caps[4].to_string();
            return Some(thread);
        }
        if let Some(caps) = p.begin_managed.captures(text) {
            let mut thread = ThreadSnapshot::new(caps[1].to_string(), ThreadKind::Managed);
            thread.daemon = caps[2].trim() == "daemon";
            thread.priority = caps[3].parse().ok();
            thread.tid = caps[4].parse().ok();
            thread.vm_state = caps[5].trim().to_string();
            return Some(thread);
        }
        None
    }

    fn parse_frame(text: &str) -> Option<StackFrame> {
        let p = patterns();

        if let Some(caps) = p.java.captures(text) {
            let source = caps[4].to_string();
            let jni = source.eq_ignore_ascii_case("native method");
            return Some(StackFrame::Java(JavaFrame {
                text: text.to_string(),
                package: caps.get(1).map(|m| m.as_str().to_string()),
                class: caps[2].to_string(),
                method: caps[3].to_string(),
                source_file: if jni || source.is_empty() { None } else { Some(source) },
                source_line: caps.get(5).and_then(|m| m.as_str().parse().ok()),
                language: if jni { JavaLanguage::Jni } else { JavaLanguage::Java },
                locks: Vec::new(),
            }));
        }

        let native_text = p.build_id.replace(text, "");
        if let Some(caps) = p.native.captures(&native_text) {
            return Some(StackFrame::Native(NativeFrame {
                text: text.to_string(),
                address: caps[1].to_string(),
                library: caps[2].to_string(),
                symbol: Some(caps[3].to_string()),
                offset: caps[4].parse().ok(),
            }));
        }
        if let Some(caps) = p.native_no_loc.captures(&native_text) {
            return Some(StackFrame::Native(NativeFrame {
                text: text.to_string(),
                address: caps[1].to_string(),
                library: caps[2].to_string(),
                symbol: caps.get(3).map(|m| m.as_str().to_string()),
                offset: None,
            }));
        }

        if let Some(caps) = p.kernel.captures(text) {
            return Some(StackFrame::Kernel(KernelFrame {
                text: text.to_string(),
                syscall: caps[1].to_string(),
                offset0: u64::from_str_radix(&caps[2], 16).unwrap_or(0),
                offset1: u64::from_str_radix(&caps[3], 16).unwrap_or(0),
            }));
        }

        if p.kernel_unknown.is_match(text) || p.no_managed_frames.is_match(text) {
            return Some(StackFrame::Other {
                text: text.to_string(),
            });
        }

        None
    }

    fn parse_lock(text: &str) -> Option<LockSnapshot> {
        let p = patterns();

        if p.lock_unknown.is_match(text) {
            return Some(LockSnapshot {
                kind: LockKind::Blocked,
                address: None,
                package: None,
                class: None,
                owner_tid: None,
            });
        }

        let caps = p.lock.captures(text)?;
        let kind = match &caps[1] {
            "locked" => LockKind::Locked,
            "waiting on" => LockKind::Waiting,
            "sleeping on" => LockKind::Sleeping,
            _ => LockKind::Blocked,
        };
        Some(LockSnapshot {
            kind,
            address: Some(caps[2].to_lowercase()),
            package: caps.get(3).map(|m| m.as_str().to_string()),
            class: Some(caps[4].to_string()),
            owner_tid: caps.get(5).and_then(|m| m.as_str().parse().ok()),
        })
    }
}

impl Default for ThreadSnapshotParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::split_lines;

    const TRACES: &str = r#"
----- pid 12345 at 2025-03-28 10:30:45 -----
Cmd line: com.example.app
Build fingerprint: 'google/xxx/release-keys'
ABI: 'arm64'

DALVIK THREADS (3):
"main" prio=5 tid=1 Blocked
  | group="main" sCount=1 dsCount=0 flags=1 obj=0x72f12a98 self=0xb400007e00001e50
  | sysTid=12345 nice=0 cgrp=default sched=0/0 handle=0x7ff1234567
  | state=S schedstat=( 1234567890 987654321 1234 ) utm=123 stm=45 core=2 HZ=100
  | held mutexes=
  at com.example.app.Store.save(Store.java:88)
  - waiting to lock <0x0ab1c2d3> (a java.lang.Object) held by thread 15
  at com.example.app.MainActivity.onCreate(MainActivity.java:25)
  at java.lang.Object.wait(Native method)

"Thread-2" daemon prio=5 tid=15 Runnable
  | group="main" sCount=0 dsCount=0 flags=0 obj=0x12f45678 self=0xb400007e12345678
  | sysTid=12360 nice=0 cgrp=default sched=0/0 handle=0x7f89abcdef
  | state=R schedstat=( 1 2 3 ) utm=1 stm=1 core=0 HZ=100
  at com.example.app.BackgroundTask.run(BackgroundTask.java:50)
  - locked <0x0ab1c2d3> (a java.lang.Object)

"GC" daemon prio=10 tid=3 Native
  | group="system" sCount=1 dsCount=0 flags=1 obj=0x12345678 self=0xb400007e87654321
  native: #00 pc 00000000000c9ebc  /apex/com.android.runtime/lib64/bionic/libc.so (__pthread_start(void*)+204) (BuildId: 5f89913e15aa7088d03682fa8322b310)
  native: #01 pc 000000000005dc60  /apex/com.android.runtime/lib64/bionic/libc.so (__start_thread+64)
  kernel: futex_wait_queue_me+0xc4/0x108
  (no managed stack frames)

----- end 12345 -----

----- pid 400 at 2025-03-28 10:30:46 -----
Cmd line: /system/bin/surfaceflinger

"surfaceflinger" sysTid=400
  #00 pc 000000000001a2b0  /system/lib64/libc.so (__ioctl+4)
  #01 pc 0000000000012345  /system/lib64/libutils.so

----- end 400 -----
"#;

    fn parse_traces(text: &str) -> VmTraces {
        let lines = split_lines(text);
        VmTracesParser::new().parse(&mut Lines::new(&lines))
    }

    #[test]
    fn test_parse_processes() {
        let traces = parse_traces(TRACES);
        assert_eq!(traces.processes.len(), 2);

        let app = &traces.processes[0];
        assert_eq!(app.pid, 12345);
        assert_eq!(app.cmd_line, "com.example.app");
        assert_eq!(app.date, "2025-03-28 10:30:45");
        assert!(app.time.is_some());
        assert_eq!(app.threads.len(), 3);

        let native = &traces.processes[1];
        assert_eq!(native.cmd_line, "/system/bin/surfaceflinger");
        assert_eq!(native.threads.len(), 1);
        assert_eq!(native.threads[0].kind, ThreadKind::Unmanaged);
        assert_eq!(native.threads[0].sys_tid, Some(400));
        assert_eq!(native.threads[0].frames.len(), 2);
    }

    #[test]
    fn test_parse_thread_header_and_attributes() {
        let traces = parse_traces(TRACES);
        let main = traces.thread(12345, "main").unwrap();
        assert_eq!(main.kind, ThreadKind::Managed);
        assert!(!main.daemon);
        assert_eq!(main.priority, Some(5));
        assert_eq!(main.tid, Some(1));
        assert_eq!(main.sys_tid, Some(12345));
        assert_eq!(main.vm_state, "Blocked");
        assert_eq!(main.attributes.len(), 4);
        assert_eq!(main.held_mutexes.as_deref(), Some(""));
        assert!(!main.runnable);

        let worker = traces.thread(12345, "Thread-2").unwrap();
        assert!(worker.daemon);
        assert_eq!(worker.tid, Some(15));
        assert!(worker.runnable);
    }

    #[test]
    fn test_parse_java_frames_and_locks() {
        let traces = parse_traces(TRACES);
        let main = traces.thread(12345, "main").unwrap();
        assert_eq!(main.frames.len(), 3);

        let save = main.frames[0].as_java().unwrap();
        assert_eq!(save.package.as_deref(), Some("com.example.app"));
        assert_eq!(save.class, "Store");
        assert_eq!(save.method, "save");
        assert_eq!(save.source_file.as_deref(), Some("Store.java"));
        assert_eq!(save.source_line, Some(88));
        assert_eq!(save.locks.len(), 1);
        assert_eq!(save.locks[0].kind, LockKind::Blocked);
        assert_eq!(save.locks[0].address.as_deref(), Some("0ab1c2d3"));
        assert_eq!(save.locks[0].qualified_class(), "java.lang.Object");
        assert_eq!(save.locks[0].owner_tid, Some(15));

        let wait = main.frames[2].as_java().unwrap();
        assert_eq!(wait.language, JavaLanguage::Jni);
        assert_eq!(wait.qualified_method(), "java.lang.Object.wait");
        assert!(wait.source_file.is_none());
    }

    #[test]
    fn test_parse_native_and_kernel_frames() {
        let traces = parse_traces(TRACES);
        let gc = traces.thread(12345, "GC").unwrap();
        assert_eq!(gc.frames.len(), 4);

        match &gc.frames[0] {
            StackFrame::Native(f) => {
                assert_eq!(f.address, "00000000000c9ebc");
                assert!(f.library.ends_with("libc.so"));
                assert_eq!(f.symbol.as_deref(), Some("__pthread_start(void*)"));
                assert_eq!(f.offset, Some(204));
            }
            other => panic!("expected native frame, got {:?}", other),
        }
        match &gc.frames[2] {
            StackFrame::Kernel(f) => {
                assert_eq!(f.syscall, "futex_wait_queue_me");
                assert_eq!(f.offset0, 0xc4);
                assert_eq!(f.offset1, 0x108);
            }
            other => panic!("expected kernel frame, got {:?}", other),
        }
        assert!(matches!(gc.frames[3], StackFrame::Other { .. }));

        let sf = &traces.processes[1].threads[0];
        match &sf.frames[1] {
            StackFrame::Native(f) => {
                assert!(f.library.ends_with("libutils.so"));
                assert!(f.symbol.is_none());
            }
            other => panic!("expected native frame, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_process_stops_at_next_header() {
        let text = "----- pid 1 at 2025-03-28 10:30:45 -----\n\
                    Cmd line: first\n\
                    ----- pid 2 at 2025-03-28 10:30:46 -----\n\
                    Cmd line: second\n\
                    ----- end 2 -----\n";
        let traces = parse_traces(text);
        assert_eq!(traces.processes.len(), 2);
        assert_eq!(traces.processes[0].cmd_line, "first");
        assert_eq!(traces.processes[1].cmd_line, "second");
    }

    #[test]
    fn test_thread_parser_stays_inside_its_window() {
        let lines = split_lines("\"a\" prio=5 tid=2 Native\n  at x.Y.z(Y.java:1)\n\"b\" prio=5 tid=3 Native\n  at x.Y.w(Y.java:2)");
        let all = Lines::new(&lines);
        let mut first = all.copy(0, 2);
        let thread = ThreadSnapshotParser::new().parse(&mut first).unwrap();
        assert_eq!(thread.name, "a");
        assert_eq!(thread.frames.len(), 1);
    }

    #[test]
    fn test_adjacent_threads_without_blank_line() {
        let traces = parse_traces(
            "----- pid 77 at 2016-03-18 14:21:48 -----
Cmd line: com.example.app
\"main\" prio=5 tid=1 Blocked
  at a.B.c(B.java:1)
\"worker\" prio=5 tid=2 Native
  at a.B.d(B.java:2)
----- end 77 -----
",
        );
        let process = traces.process(77).unwrap();
        let names: Vec<&str> = process.threads.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["main", "worker"]);
        assert_eq!(process.threads[0].frames.len(), 1);
        assert_eq!(process.threads[1].frames[0].text(), "at a.B.d(B.java:2)");
    }

    #[test]
    fn test_not_a_thread_header() {
        let lines = split_lines("DALVIK THREADS (3):");
        assert!(ThreadSnapshotParser::new().parse(&mut Lines::new(&lines)).is_none());
    }

    #[test]
    fn test_stacks_by_thread_name() {
        let traces = parse_traces(TRACES);
        let stacks = traces.stacks(12345);
        assert_eq!(stacks.len(), 3);
        assert_eq!(stacks["main"].len(), 3);
        assert!(traces.stacks(999).is_empty());
    }
}
