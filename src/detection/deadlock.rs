use std::collections::{BTreeMap, BTreeSet};

use crate::parsers::thread_snapshot_parser::{LockFlags, ThreadSnapshot};
use crate::parsers::vm_traces_parser::ProcessSnapshot;

/// Managed tids of the threads a thread is blocked behind.
fn blocked_on(thread: &ThreadSnapshot) -> Vec<i32> {
    thread
        .locks
        .values()
        .filter(|lock| lock.flags.contains(LockFlags::BLOCKED))
        .filter_map(|lock| lock.thread_id)
        .collect()
}

/// Finds the threads of a process that wait on each other in a cycle.
///
/// Edges come from `waiting to lock <...> held by thread N` lines, already
/// combined into the thread locks. Returns the managed tids on any cycle.
pub fn detect_deadlocks(process: &ProcessSnapshot) -> BTreeSet<i32> {
    let edges: BTreeMap<i32, Vec<i32>> = process
        .threads
        .iter()
        .filter(|t| t.tid >= 0)
        .map(|t| (t.tid, blocked_on(t)))
        .filter(|(_, holders)| !holders.is_empty())
        .collect();

    let mut deadlocked = BTreeSet::new();
    for &start in edges.keys() {
        let mut path = vec![start];
        let mut stack = vec![(start, 0usize)];

        // Depth first, one holder at a time.
        while let Some((tid, next)) = stack.pop() {
            let holders = edges.get(&tid).map(Vec::as_slice).unwrap_or(&[]);
            if next >= holders.len() {
                path.pop();
                continue;
            }
            stack.push((tid, next + 1));

            let holder = holders[next];
            if let Some(at) = path.iter().position(|&t| t == holder) {
                deadlocked.extend(path[at..].iter().copied());
                continue;
            }
            if edges.contains_key(&holder) {
                path.push(holder);
                stack.push((holder, 0));
            }
        }
    }
    deadlocked
}
