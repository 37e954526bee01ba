use chrono::{Duration, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;

use super::config::InspectorConfig;
use super::deadlock::detect_deadlocks;
use crate::bugreport::{Bugreport, ProcessInfo, ThreadInfo};
use crate::error::Result;
use crate::lines::Lines;
use crate::parsers::anr_parser::AnrParser;
use crate::parsers::logcat_parser::{LogBuffer, LogLine, Logcat};
use crate::parsers::thread_snapshot_parser::{BinderCall, JavaFrame, LockFlags, LockSnapshot, ThreadSnapshot};
use crate::parsers::vm_traces_parser::{ProcessSnapshot, VmTraces};
use crate::utils::{full_match, match_captures, try_full_match};

const HANDWRITTEN_BINDER_SUFFIXES: [&str; 2] = ["Native", "Proxy"];

static INPUT_DISPATCHER_ANR_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(
        r"Application is not responding: .* It has been (?P<event>\d+\.?\d*)ms since event, (?P<wait>\d+\.?\d*)ms since wait started.*",
    )
});

/// A log line is interesting if it has this exact tag and its whole message
/// matches the pattern.
struct InterestingLineMatcher {
    tag: String,
    pattern: Regex,
}

impl InterestingLineMatcher {
    fn matches(&self, line: &LogLine) -> bool {
        line.tag.as_deref() == Some(self.tag.as_str()) && self.pattern.is_match(&line.text)
    }
}

/// Makes the connections between the sections of a parsed report and
/// annotates them.
pub struct Inspector {
    config: InspectorConfig,
    matchers: Vec<InterestingLineMatcher>,
}

impl Default for Inspector {
    /// The built-in rules are constants and compiled like the other built-in patterns.
    fn default() -> Self {
        let config = InspectorConfig::default();
        let matchers = config
            .interesting_lines
            .iter()
            .map(|rule| InterestingLineMatcher {
                tag: rule.tag.clone(),
                pattern: full_match(&rule.pattern),
            })
            .collect();
        Inspector { config, matchers }
    }
}

impl Inspector {
    pub fn with_config(config: InspectorConfig) -> Result<Self> {
        let matchers = config
            .interesting_lines
            .iter()
            .map(|rule| {
                Ok(InterestingLineMatcher {
                    tag: rule.tag.clone(),
                    pattern: try_full_match(&rule.pattern)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Inspector { config, matchers })
    }

    pub fn config(&self) -> &InspectorConfig {
        &self.config
    }

    pub fn inspect(&self, report: &mut Bugreport) -> Result<()> {
        self.find_anr(report)?;

        for traces in [&mut report.vm_traces_just_now, &mut report.vm_traces_last_anr] {
            if let Some(traces) = traces {
                inspect_processes(traces);
            }
        }
        if let Some(anr) = report.anr.as_mut() {
            if let Some(traces) = anr.vm_traces.as_mut() {
                inspect_processes(traces);
                if let Some(pid) = anr.pid {
                    mark_deadlocks(traces, pid);
                }
            }
        }

        for logcat in [&mut report.system_log, &mut report.event_log, &mut report.logcat] {
            if let Some(logcat) = logcat {
                invent_logcat_times(&mut logcat.lines);
            }
        }
        merge_logcat(report);

        make_process_info(report);
        self.make_interesting_logcat(report);
        mark_anr_logcat_regions(report);
        mark_bugreport_regions(report);

        let anr_pid = report.anr.as_ref().and_then(|a| a.pid);
        if let Some(traces) = report.anr.as_mut().and_then(|a| a.vm_traces.as_mut()) {
            make_interesting_processes(traces, anr_pid);
        }
        Ok(())
    }

    /// The caller's monkey ANR if there is one, otherwise the first ANR the
    /// ActivityManager logged.
    fn find_anr(&self, report: &mut Bugreport) -> Result<()> {
        if report.anr.is_some() {
            return Ok(());
        }
        if let Some(mut anr) = report.monkey_anr.clone() {
            if anr.vm_traces.is_none() {
                anr.vm_traces = report.vm_traces_last_anr.clone();
            }
            report.anr = Some(anr);
            return Ok(());
        }

        let Some(system_log) = &report.system_log else {
            return Ok(());
        };
        let lines = system_log.filter(&self.config.anr_tag, self.config.anr_level);
        let anrs = AnrParser::new().parse(Lines::new(&lines))?;
        if let Some(mut anr) = anrs.into_iter().next() {
            debug!(process = %anr.process_name, pid = ?anr.pid, "ANR found in the system log");
            // These are the traces of the last ANR, which may not be this one.
            anr.vm_traces = report.vm_traces_last_anr.clone();
            report.anr = Some(anr);
        }
        Ok(())
    }

    /// Buffer begin lines and lines matching a configured rule.
    fn make_interesting_logcat(&self, report: &mut Bugreport) {
        let Some(logcat) = &report.logcat else {
            return;
        };
        report.interesting_log_lines = logcat
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_buffer_begin() || self.matchers.iter().any(|m| m.matches(line)))
            .map(|(index, _)| index)
            .collect();
    }
}

// ============================================================================
// PROCESS REGISTRY
// ============================================================================

fn make_process_info(report: &mut Bugreport) {
    let mut registry = std::mem::take(&mut report.all_known_processes);

    let anr_traces = report.anr.as_ref().and_then(|a| a.vm_traces.as_ref());
    for traces in [anr_traces, report.vm_traces_just_now.as_ref(), report.vm_traces_last_anr.as_ref()]
        .into_iter()
        .flatten()
    {
        for process in &traces.processes {
            let info = register_process(&mut registry, process.pid, &process.cmd_line);
            for thread in &process.threads {
                if let Ok(tid) = u32::try_from(thread.sys_tid) {
                    register_thread(info, tid, &thread.name);
                }
            }
        }
    }

    if let Some(anr) = &report.anr {
        if let Some(pid) = anr.pid {
            register_process(&mut registry, pid, &anr.process_name);
        }
    }

    if let Some(logcat) = &report.logcat {
        for line in &logcat.lines {
            if let Some(pid) = line.pid {
                let info = register_process(&mut registry, pid, "");
                if let Some(tid) = line.tid {
                    register_thread(info, tid, "");
                }
            }
        }
    }

    report.all_known_processes = registry;
}

/// The existing record, or a new one. A longer command line wins.
fn register_process<'r>(registry: &'r mut BTreeMap<u32, ProcessInfo>, pid: u32, cmd_line: &str) -> &'r mut ProcessInfo {
    let info = registry
        .entry(pid)
        .or_insert_with(|| ProcessInfo::new(pid, cmd_line));
    if cmd_line.len() > info.cmd_line.len() {
        info.cmd_line = cmd_line.to_string();
    }
    info
}

fn register_thread(process: &mut ProcessInfo, tid: u32, name: &str) {
    let pid = process.pid;
    let info = process.threads.entry(tid).or_insert_with(|| ThreadInfo {
        pid,
        tid,
        name: name.to_string(),
    });
    if name.len() > info.name.len() {
        info.name = name.to_string();
    }
}

// ============================================================================
// THREADS
// ============================================================================

fn inspect_processes(traces: &mut VmTraces) {
    for process in &mut traces.processes {
        for thread in &mut process.threads {
            combine_locks(thread);
            thread.outbound_binder = outgoing_binder_call(thread);
            thread.inbound_binder = incoming_binder_call(thread);
            if !is_idle_heap_task_daemon(thread) {
                thread.blocked = thread.locks.values().any(|l| l.flags.contains(LockFlags::BLOCKED));
            }
            thread.interesting = is_thread_interesting(thread);
        }
    }
}

/// Pulls the locks out of the frames into the thread, by address.
fn combine_locks(thread: &mut ThreadSnapshot) {
    let mut combined: BTreeMap<String, LockSnapshot> = BTreeMap::new();
    for java in thread.java_frames() {
        for lock in &java.locks {
            combined
                .entry(lock.key().to_string())
                .and_modify(|prev| prev.flags |= lock.flags)
                .or_insert_with(|| lock.clone());
        }
    }
    thread.locks = combined;
}

/// `BinderProxy.transactNative` then `BinderProxy.transact` on top of the
/// stack, followed by the interface glue.
fn outgoing_binder_call(thread: &ThreadSnapshot) -> Option<BinderCall> {
    let first = thread.frames.iter().position(|f| f.is_java())?;
    let frame = |i: usize| thread.frames.get(i).and_then(|f| f.as_java());

    if !frame(first)?.is("android.os", "BinderProxy", "transactNative") {
        return None;
    }
    if !frame(first + 1)?.is("android.os", "BinderProxy", "transact") {
        return None;
    }
    let glue = frame(first + 2)?;
    Some(BinderCall {
        package_name: glue.package_name.clone(),
        class_name: Some(fix_binder_class(&glue.class_name)),
        method_name: Some(glue.method_name.clone()),
    })
}

/// `Binder.execTransact` at the bottom of the stack, with the interface glue
/// and the implementation above it.
fn incoming_binder_call(thread: &ThreadSnapshot) -> Option<BinderCall> {
    let last = thread.frames.iter().rposition(|f| f.is_java())?;
    let frame = |i: usize| thread.frames.get(i).and_then(|f| f.as_java());

    if !frame(last)?.is("android.os", "Binder", "execTransact") {
        return None;
    }
    let glue = frame(last.checked_sub(1)?)?;
    // The implementation may have been inlined away.
    let method = last.checked_sub(2).and_then(frame).map(|f| f.method_name.clone());
    Some(BinderCall {
        package_name: glue.package_name.clone(),
        class_name: Some(fix_binder_class(&glue.class_name)),
        method_name: method,
    })
}

/// Strips the aidl inner classes, and maps the older handwritten
/// `FooNative`/`FooProxy` glue to `IFoo`.
pub fn fix_binder_class(class_name: &str) -> String {
    if let Some(base) = class_name.strip_suffix("$Stub$Proxy") {
        return base.to_string();
    }
    if let Some(base) = class_name.strip_suffix("$Stub") {
        return base.to_string();
    }
    for suffix in HANDWRITTEN_BINDER_SUFFIXES {
        if class_name.len() <= suffix.len() + 2 {
            continue;
        }
        if let Some(base) = class_name.strip_suffix(suffix) {
            let mut chars = class_name.chars();
            let first = chars.next();
            let second = chars.next();
            if first == Some('I') && second.map_or(false, char::is_uppercase) {
                return base.to_string();
            }
            return format!("I{}", base);
        }
    }
    class_name.to_string()
}

/// Whether the thread has this name and exactly these java frames, top first.
/// Other frames are skipped.
fn matches_java_stack(thread: &ThreadSnapshot, name: Option<&str>, signature: &[&str]) -> bool {
    if name.map_or(false, |n| n != thread.name) {
        return false;
    }
    let java: Vec<&JavaFrame> = thread.java_frames().collect();
    java.len() == signature.len() && java.iter().zip(signature).all(|(f, s)| f.signature() == *s)
}

fn is_idle_heap_task_daemon(thread: &ThreadSnapshot) -> bool {
    matches_java_stack(
        thread,
        Some("HeapTaskDaemon"),
        &[
            "dalvik.system.VMRuntime.runHeapTasks",
            "java.lang.Daemons$HeapTaskDaemon.run",
            "java.lang.Thread.run",
        ],
    )
}

fn is_thread_interesting(thread: &ThreadSnapshot) -> bool {
    // The thread that dumps the stacks
    if matches_java_stack(thread, Some("Signal Catcher"), &[]) {
        return false;
    }
    thread.runnable || thread.is_binder()
}

fn mark_deadlocks(traces: &mut VmTraces, pid: u32) {
    let Some(process) = traces.processes.iter_mut().find(|p| p.pid == pid) else {
        return;
    };
    let cycle = detect_deadlocks(process);
    if cycle.is_empty() {
        return;
    }
    debug!(pid, tids = ?cycle, "deadlock");
    for thread in &mut process.threads {
        if cycle.contains(&thread.tid) {
            thread.deadlocked = true;
        }
    }
    if !traces.deadlocked_pids.contains(&pid) {
        traces.deadlocked_pids.push(pid);
    }
}

/// Copies of the processes holding only their interesting threads. A process
/// is kept if it is the ANR process or has any interesting thread.
fn make_interesting_processes(traces: &mut VmTraces, anr_pid: Option<u32>) {
    traces.interesting_processes = traces
        .processes
        .iter()
        .map(|process| ProcessSnapshot {
            threads: process.threads.iter().filter(|t| t.interesting).cloned().collect(),
            ..process.clone()
        })
        .filter(|process| Some(process.pid) == anr_pid || !process.threads.is_empty())
        .collect();
}

// ============================================================================
// LOGCAT
// ============================================================================

/// Lines without a time take the time of the next line that has one, or of
/// the last one at the end of the log.
fn invent_logcat_times(lines: &mut [LogLine]) {
    let mut time = None;
    for line in lines.iter_mut().rev() {
        match line.time {
            Some(t) => time = Some(t),
            None => line.time = time,
        }
    }

    if let Some(last) = lines.iter().rposition(|l| l.time.is_some()) {
        let time = lines[last].time;
        for line in &mut lines[last..] {
            line.time = time;
        }
    }
}

fn event_buffer_begin(time: Option<NaiveDateTime>) -> LogLine {
    let text = "--------- beginning of event".to_string();
    LogLine {
        raw_text: text.clone(),
        buffer_begin: Some("event".to_string()),
        time,
        text,
        ..LogLine::default()
    }
}

/// Merges the system and event logs by time into `logcat`, unless the report
/// already has one. Merged lines are renumbered from 1.
fn merge_logcat(report: &mut Bugreport) {
    if report.logcat.is_some() || (report.system_log.is_none() && report.event_log.is_none()) {
        return;
    }
    let system: &[LogLine] = report.system_log.as_ref().map_or(&[], |l| &l.lines);
    let event: &[LogLine] = report.event_log.as_ref().map_or(&[], |l| &l.lines);

    let mut merged = Vec::with_capacity(system.len() + event.len() + 1);
    // The event log has no beginning marker, make one up at the first event line.
    let mut seen_event = false;
    let (mut s, mut e) = (0, 0);

    while s < system.len() || e < event.len() {
        let take_system = match (system.get(s), event.get(e)) {
            (Some(_), None) => true,
            (None, _) => false,
            (Some(sys), Some(ev)) => match (sys.time, ev.time) {
                (None, _) => true,
                (_, None) => false,
                (Some(st), Some(et)) => st <= et,
            },
        };

        if take_system {
            merged.push(system[s].clone());
            s += 1;
        } else {
            if !seen_event && event[e].time.is_some() {
                merged.push(event_buffer_begin(event[e].time));
            }
            seen_event = true;
            merged.push(event[e].clone());
            e += 1;
        }
    }

    for (index, line) in merged.iter_mut().enumerate() {
        line.lineno = index + 1;
    }
    report.logcat = Some(Logcat {
        buffer: Some(LogBuffer::Merged),
        lines: merged,
    });
}

/// InputDispatcher reports how long it waited before declaring the ANR; the
/// lines inside that window get `region_anr`.
fn mark_anr_logcat_regions(report: &mut Bugreport) {
    let Some(logcat) = report.logcat.as_mut() else {
        return;
    };

    let regions: Vec<(NaiveDateTime, NaiveDateTime)> = logcat
        .lines
        .iter()
        .filter(|line| line.tag.as_deref() == Some("InputDispatcher"))
        .filter_map(|line| {
            let caps = match_captures(&INPUT_DISPATCHER_ANR_RE, &line.text)?;
            let end = line.time?;
            let wait: f64 = caps["wait"].parse().ok()?;
            let seconds = (wait / 1000.0).trunc() as i64;
            let millis = (wait % 1000.0).round() as i64;
            let wait_ms = seconds.checked_mul(1000)?.checked_add(millis)?;
            let begin = end.checked_sub_signed(Duration::try_milliseconds(wait_ms)?);
            if begin.is_none() {
                debug!(wait_ms, "InputDispatcher wait out of range");
            }
            Some((begin?, end))
        })
        .collect();

    for (begin, end) in regions {
        for line in &mut logcat.lines {
            if line.time.map_or(false, |t| t >= begin && t < end) {
                line.region_anr = true;
            }
        }
    }
}

/// Lines logged while the bugreport was being taken.
fn mark_bugreport_regions(report: &mut Bugreport) {
    let (Some(begin), Some(end)) = (report.start_time, report.end_time) else {
        return;
    };
    let Some(logcat) = report.logcat.as_mut() else {
        return;
    };
    for line in &mut logcat.lines {
        if line.time.map_or(false, |t| t >= begin && t < end) {
            line.region_bugreport = true;
        }
    }
}
