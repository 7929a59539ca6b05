//! Per-thread analysis of VM traces: locks, binder calls, blocked and
//! interesting threads.

use std::collections::BTreeMap;

use crate::parsers::bugreport_parser::ProcessInfo;
use crate::parsers::vm_traces_parser::{
    BinderCall, ProcessSnapshot, StackFrame, ThreadLock, ThreadSnapshot, VmTraces,
};

/// Handwritten binder glue names its classes `FooNative` / `FooProxy`.
const HANDWRITTEN_BINDER_SUFFIXES: &[&str] = &["Native", "Proxy"];

/// The heap task daemon sits in this stack all day; it isn't stuck.
const IDLE_HEAP_TASK_DAEMON: &[&str] = &[
    "dalvik.system.VMRuntime.runHeapTasks",
    "java.lang.Daemons$HeapTaskDaemon.run",
    "java.lang.Thread.run",
];

// ============================================================================
// KNOWN PROCESSES
// ============================================================================

/// Records every pid and sysTid the traces name. Longer names win, since
/// some sources truncate them.
pub fn collect_known_processes(known: &mut BTreeMap<u32, ProcessInfo>, traces: &VmTraces) {
    for process in &traces.processes {
        let info = known.entry(process.pid).or_insert_with(|| ProcessInfo {
            pid: process.pid,
            cmd_line: String::new(),
            threads: BTreeMap::new(),
        });
        if process.cmd_line.len() > info.cmd_line.len() {
            info.cmd_line = process.cmd_line.clone();
        }

        for thread in &process.threads {
            let tid = match thread.sys_tid {
                Some(tid) => tid,
                None => continue,
            };
            let name = info.threads.entry(tid).or_default();
            if thread.name.len() > name.len() {
                *name = thread.name.clone();
            }
        }
    }
}

// ============================================================================
// THREAD ANALYSIS
// ============================================================================

/// Runs every per-thread pass over a set of traces.
pub fn inspect_processes(traces: &mut VmTraces) {
    for process in &mut traces.processes {
        for thread in &mut process.threads {
            thread.locks = combine_locks(thread);
            thread.outbound_binder = outgoing_binder_call(thread);
            thread.inbound_binder = incoming_binder_call(thread);
            thread.blocked = !matches_java_stack(thread, Some("HeapTaskDaemon"), IDLE_HEAP_TASK_DAEMON)
                && thread.locks.iter().any(ThreadLock::is_blocked);
            thread.interesting = is_thread_interesting(thread);
        }
    }
}

/// Merges the locks of every frame, keyed by address.
fn combine_locks(thread: &ThreadSnapshot) -> Vec<ThreadLock> {
    let mut combined: Vec<ThreadLock> = Vec::new();

    for frame in thread.java_frames() {
        for lock in &frame.locks {
            match combined.iter_mut().find(|l| l.address == lock.address) {
                Some(existing) => {
                    if !existing.kinds.contains(&lock.kind) {
                        existing.kinds.push(lock.kind);
                        existing.kinds.sort();
                    }
                    if existing.owner_tid.is_none() {
                        existing.owner_tid = lock.owner_tid;
                    }
                }
                None => combined.push(ThreadLock {
                    address: lock.address.clone(),
                    class: lock.qualified_class(),
                    kinds: vec![lock.kind],
                    owner_tid: lock.owner_tid,
                }),
            }
        }
    }

    combined
}

/// Top of stack `BinderProxy.transactNative` ← `BinderProxy.transact` ← the
/// proxy method making the call.
fn outgoing_binder_call(thread: &ThreadSnapshot) -> Option<BinderCall> {
    let start = thread.frames.iter().position(|f| f.as_java().is_some())?;
    let mut frames = thread.frames[start..].iter();

    let top = frames.next()?.as_java()?;
    if !top.is("android.os", "BinderProxy", "transactNative") {
        return None;
    }
    let transact = frames.next()?.as_java()?;
    if !transact.is("android.os", "BinderProxy", "transact") {
        return None;
    }
    let proxy = frames.next()?.as_java()?;

    Some(BinderCall {
        package: proxy.package.clone(),
        class: fix_binder_class(&proxy.class),
        method: Some(proxy.method.clone()),
    })
}

/// Bottom of stack `Binder.execTransact` → the stub's `onTransact` → the
/// implementation. Proguard may inline the last one away.
fn incoming_binder_call(thread: &ThreadSnapshot) -> Option<BinderCall> {
    let end = thread.frames.iter().rposition(|f| f.as_java().is_some())?;
    let mut frames = thread.frames[..=end].iter().rev();

    let bottom = frames.next()?.as_java()?;
    if !bottom.is("android.os", "Binder", "execTransact") {
        return None;
    }
    let stub = frames.next()?.as_java()?;
    let method = frames.next().and_then(StackFrame::as_java).map(|f| f.method.clone());

    Some(BinderCall {
        package: stub.package.clone(),
        class: fix_binder_class(&stub.class),
        method,
    })
}

/// Reduces binder glue class names to the interface name: strips AIDL's
/// `$Stub$Proxy` / `$Stub` and turns `FooNative` into `IFoo`.
pub fn fix_binder_class(class: &str) -> String {
    if let Some(interface) = class.strip_suffix("$Stub$Proxy") {
        return interface.to_string();
    }
    if let Some(interface) = class.strip_suffix("$Stub") {
        return interface.to_string();
    }

    for suffix in HANDWRITTEN_BINDER_SUFFIXES {
        if class.len() <= suffix.len() + 2 {
            continue;
        }
        if let Some(base) = class.strip_suffix(suffix) {
            let mut chars = base.chars();
            let already_interface = chars.next() == Some('I') && chars.next().map_or(false, char::is_uppercase);
            return if already_interface {
                base.to_string()
            } else {
                format!("I{}", base)
            };
        }
    }

    class.to_string()
}

/// Whether the thread has the given name and exactly this sequence of Java
/// frames (native frames in between are ignored).
pub fn matches_java_stack(thread: &ThreadSnapshot, name: Option<&str>, signature: &[&str]) -> bool {
    if name.map_or(false, |n| n != thread.name) {
        return false;
    }
    let methods: Vec<String> = thread.java_frames().map(|f| f.qualified_method()).collect();
    methods.len() == signature.len() && methods.iter().zip(signature).all(|(m, s)| m == s)
}

fn is_thread_interesting(thread: &ThreadSnapshot) -> bool {
    // The thread dumping the traces.
    if thread.name == "Signal Catcher" {
        return false;
    }
    thread.runnable || thread.is_binder()
}

// ============================================================================
// INTERESTING PROCESSES
// ============================================================================

/// Copies of the processes worth showing, reduced to their interesting
/// threads: the ANR process always, others when any thread is interesting.
pub fn interesting_processes(traces: &VmTraces, anr_pid: Option<u32>) -> Vec<ProcessSnapshot> {
    traces
        .processes
        .iter()
        .filter_map(|process| {
            let threads: Vec<ThreadSnapshot> = process.threads.iter().filter(|t| t.interesting).cloned().collect();
            if Some(process.pid) == anr_pid || !threads.is_empty() {
                Some(ProcessSnapshot {
                    pid: process.pid,
                    cmd_line: process.cmd_line.clone(),
                    date: process.date.clone(),
                    time: process.time,
                    threads,
                })
            } else {
                None
            }
        })
        .collect()
}
