//! Wait-cycle detection across the processes of a traces dump.

use std::collections::HashMap;

use crate::parsers::vm_traces_parser::{ThreadLock, ThreadRef, VmTraces};

/// (process index, thread index) into `VmTraces::processes`.
type ThreadKey = (usize, usize);

/// Builds the "waits for" graph: a thread blocked on a lock waits for the
/// lock's owner; a thread in an outgoing binder call waits for every thread
/// of another process serving that interface.
fn wait_graph(traces: &VmTraces) -> HashMap<ThreadKey, Vec<ThreadKey>> {
    let mut graph: HashMap<ThreadKey, Vec<ThreadKey>> = HashMap::new();

    for (pi, process) in traces.processes.iter().enumerate() {
        for (ti, thread) in process.threads.iter().enumerate() {
            let waits_for = graph.entry((pi, ti)).or_default();

            for owner in thread
                .locks
                .iter()
                .filter(|l| l.is_blocked())
                .filter_map(|l: &ThreadLock| l.owner_tid)
            {
                if let Some(oi) = process.threads.iter().position(|t| t.tid == Some(owner)) {
                    waits_for.push((pi, oi));
                }
            }

            if let Some(call) = &thread.outbound_binder {
                let interface = call.interface();
                for (qi, server) in traces.processes.iter().enumerate() {
                    if qi == pi {
                        continue;
                    }
                    for (si, candidate) in server.threads.iter().enumerate() {
                        if candidate.inbound_binder.as_ref().map(|b| b.interface()) == Some(interface.clone()) {
                            waits_for.push((qi, si));
                        }
                    }
                }
            }
        }
    }

    graph
}

/// Depth-first search for a cycle reachable from `current`.
fn find_cycle(
    current: ThreadKey,
    graph: &HashMap<ThreadKey, Vec<ThreadKey>>,
    path: &mut Vec<ThreadKey>,
    visited: &mut Vec<ThreadKey>,
) -> Option<Vec<ThreadKey>> {
    if let Some(start) = path.iter().position(|k| *k == current) {
        return Some(path[start..].to_vec());
    }
    if visited.contains(&current) {
        return None;
    }
    visited.push(current);
    path.push(current);

    if let Some(next) = graph.get(&current) {
        for &key in next {
            if let Some(cycle) = find_cycle(key, graph, path, visited) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    None
}

/// Follows lock and binder edges from the main thread of `pid` and returns
/// the threads of the first wait cycle found, or nothing.
pub fn detect_deadlock(traces: &VmTraces, pid: u32) -> Vec<ThreadRef> {
    let start = traces.processes.iter().enumerate().find_map(|(pi, process)| {
        if process.pid != pid {
            return None;
        }
        process.threads.iter().position(|t| t.name == "main").map(|ti| (pi, ti))
    });
    let start = match start {
        Some(start) => start,
        None => return Vec::new(),
    };

    let graph = wait_graph(traces);
    let cycle = find_cycle(start, &graph, &mut Vec::new(), &mut Vec::new()).unwrap_or_default();

    cycle
        .into_iter()
        .map(|(pi, ti)| {
            let process = &traces.processes[pi];
            let thread = &process.threads[ti];
            ThreadRef {
                pid: process.pid,
                name: thread.name.clone(),
                tid: thread.tid,
            }
        })
        .collect()
}
