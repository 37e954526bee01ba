use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};
use tracing::trace;

use crate::error::Result;
use crate::lines::{Line, Lines};
use crate::utils::{full_match, get_int, get_str, match_captures};

// ============================================================================
// THREAD STRUCTURES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadKind {
    /// Attached to the VM, has a managed `tid=`.
    Managed,
    /// Native thread listed by `sysTid=` only.
    Unmanaged,
}

/// Bit set of the ways a thread relates to a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LockFlags(u8);

impl LockFlags {
    pub const NONE: LockFlags = LockFlags(0);
    pub const LOCKED: LockFlags = LockFlags(1);
    pub const WAITING: LockFlags = LockFlags(2);
    pub const SLEEPING: LockFlags = LockFlags(4);
    pub const BLOCKED: LockFlags = LockFlags(8);

    pub fn contains(self, other: LockFlags) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for LockFlags {
    type Output = LockFlags;

    fn bitor(self, rhs: LockFlags) -> LockFlags {
        LockFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for LockFlags {
    fn bitor_assign(&mut self, rhs: LockFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSnapshot {
    pub flags: LockFlags,
    /// `None` for "an unknown object".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Managed tid of the holder, when the trace names it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<i32>,
}

impl LockSnapshot {
    /// Key used when combining the locks of a thread.
    pub fn key(&self) -> &str {
        self.address.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JavaLanguage {
    Java,
    Jni,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JavaFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    pub class_name: String,
    pub method_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_line: Option<i32>,
    pub language: JavaLanguage,
    pub locks: Vec<LockSnapshot>,
}

impl JavaFrame {
    pub fn is(&self, package_name: &str, class_name: &str, method_name: &str) -> bool {
        self.package_name.as_deref() == Some(package_name)
            && self.class_name == class_name
            && self.method_name == method_name
    }

    /// `package.Class.method`
    pub fn signature(&self) -> String {
        match &self.package_name {
            Some(package) => format!("{}.{}.{}", package, self.class_name, self.method_name),
            None => format!("{}.{}", self.class_name, self.method_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeFrame {
    pub library: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelFrame {
    /// `None` when the kernel stack could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syscall: Option<String>,
    pub offset0: u64,
    pub offset1: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameKind {
    Java(JavaFrame),
    Native(NativeFrame),
    Kernel(KernelFrame),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// The raw trace line.
    pub text: String,
    pub kind: FrameKind,
}

impl StackFrame {
    pub fn as_java(&self) -> Option<&JavaFrame> {
        match &self.kind {
            FrameKind::Java(java) => Some(java),
            _ => None,
        }
    }

    pub fn is_java(&self) -> bool {
        self.as_java().is_some()
    }
}

/// Interface and method of a binder transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BinderCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadSnapshot {
    /// Pid of the owning process snapshot.
    pub pid: u32,
    pub kind: ThreadKind,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon: Option<String>,
    pub priority: i32,
    pub tid: i32,
    pub sys_tid: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_state: Option<String>,
    pub attribute_text: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_mutexes: Option<String>,
    pub runnable: bool,
    pub frames: Vec<StackFrame>,
    /// Locks of all frames combined by address.
    pub locks: BTreeMap<String, LockSnapshot>,
    pub blocked: bool,
    pub interesting: bool,
    pub deadlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_binder: Option<BinderCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_binder: Option<BinderCall>,
}

impl Default for ThreadSnapshot {
    fn default() -> Self {
        ThreadSnapshot {
            pid: 0,
            kind: ThreadKind::Managed,
            name: String::new(),
            daemon: None,
            priority: -1,
            tid: -1,
            sys_tid: -1,
            vm_state: None,
            attribute_text: Vec::new(),
            held_mutexes: None,
            runnable: false,
            frames: Vec::new(),
            locks: BTreeMap::new(),
            blocked: false,
            interesting: false,
            deadlocked: false,
            outbound_binder: None,
            inbound_binder: None,
        }
    }
}

impl ThreadSnapshot {
    pub fn java_frames(&self) -> impl Iterator<Item = &JavaFrame> {
        self.frames.iter().filter_map(StackFrame::as_java)
    }

    pub fn is_binder(&self) -> bool {
        self.inbound_binder.is_some() || self.outbound_binder.is_some()
    }
}

// ============================================================================
// LINE PATTERNS
// ============================================================================

static BEGIN_UNMANAGED_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r#"\s*"(?P<name>.*)" sysTid=(?P<sys_tid>\d+)(?P<rest>.*)"#));
static BEGIN_MANAGED_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(r#"\s*"(?P<name>.*)" (?P<daemon>.*?) ?prio=(?P<prio>\d+)\s+tid=(?P<tid>\d+)\s*(?P<state>.*)"#)
});
static BEGIN_NOT_ATTACHED_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(r#"\s*"(?P<name>.*)" (?P<daemon>.*?) ?prio=(?P<prio>\d+)\s+(?P<state>\(not attached\))"#)
});

static ATTR_RE: Lazy<Regex> = Lazy::new(|| full_match(r"\s*\| (?P<attr>.*)"));
static SYS_TID_ATTR_RE: Lazy<Regex> = Lazy::new(|| full_match(r"\s*\| sysTid=(?P<sys_tid>\d+) .*"));
static STATE_RUNNABLE_ATTR_RE: Lazy<Regex> = Lazy::new(|| full_match(r"\s*\| state=R .*"));
static HELD_MUTEXES_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"\s*\| held mutexes=\s*(?P<mutexes>.*)"));

const BUILD_ID: &str = r"(?:\s+\(BuildId: [0-9a-fA-F]+\))?";

static NATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(&format!(
        r"\s*(?:native: )?#\d+ \S+ [0-9a-fA-F]+\s+(?P<library>.*?)\s+\((?P<symbol>.*)\+(?P<offset>\d+)\){}",
        BUILD_ID
    ))
});
static NATIVE_NO_LOC_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(&format!(
        r"\s*(?:native: )?#\d+ \S+ [0-9a-fA-F]+\s+(?P<library>.*?)(?:\s+\((?P<symbol>.*)\))?{}",
        BUILD_ID
    ))
});
static KERNEL_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(r"\s*kernel: (?P<syscall>.*)\+0x(?P<off0>[0-9a-fA-F]+)/0x(?P<off1>[0-9a-fA-F]+)")
});
static KERNEL_UNKNOWN_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"\s*kernel: \(couldn't read /proc/self/task/\d+/stack\)"));

static JAVA_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(
        r"\s*at (?:(?P<package>.+)\.)?(?P<class>[^.]+)\.(?P<method>[^.(]+)\((?P<file>[^:()]*):(?P<line>-?\d+)\)",
    )
});
static JNI_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(r"\s*at (?:(?P<package>.+)\.)?(?P<class>[^.]+)\.(?P<method>[^.(]+)\(Native [mM]ethod\)")
});
static JAVA_NO_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(r"\s*at (?:(?P<package>.+)\.)?(?P<class>[^.]+)\.(?P<method>[^.(]+)\((?P<file>[^:()]*)\)")
});

const LOCK_OBJECT: &str = r"<0x(?P<address>[0-9a-fA-F]{1,16})> \(a (?:(?P<package>.+)\.)?(?P<class>[^.]+)\)";

static LOCKED_RE: Lazy<Regex> =
    Lazy::new(|| full_match(&format!(r"\s*- locked {}", LOCK_OBJECT)));
static SLEEPING_ON_RE: Lazy<Regex> =
    Lazy::new(|| full_match(&format!(r"\s*- sleeping on {}", LOCK_OBJECT)));
static WAITING_ON_RE: Lazy<Regex> =
    Lazy::new(|| full_match(&format!(r"\s*- waiting on {}", LOCK_OBJECT)));
static WAITING_TO_LOCK_HELD_RE: Lazy<Regex> = Lazy::new(|| {
    full_match(&format!(
        r"\s*- waiting to lock {}\s+held by thread (?P<holder>\d+)",
        LOCK_OBJECT
    ))
});
static WAITING_TO_LOCK_RE: Lazy<Regex> =
    Lazy::new(|| full_match(&format!(r"\s*- waiting to lock {}", LOCK_OBJECT)));
static WAITING_TO_LOCK_UNKNOWN_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"\s*- waiting to lock an unknown object"));

static NO_MANAGED_FRAMES_RE: Lazy<Regex> =
    Lazy::new(|| full_match(r"\s*\(no managed stack frames\)"));

/// Lock line patterns, with the flag each one sets.
static LOCK_PATTERNS: Lazy<Vec<(&'static Lazy<Regex>, LockFlags)>> = Lazy::new(|| {
    vec![
        (&LOCKED_RE, LockFlags::LOCKED),
        (&SLEEPING_ON_RE, LockFlags::SLEEPING),
        (&WAITING_ON_RE, LockFlags::WAITING),
        (&WAITING_TO_LOCK_HELD_RE, LockFlags::BLOCKED),
        (&WAITING_TO_LOCK_RE, LockFlags::BLOCKED),
    ]
});

/// Whether the line starts a thread in a VM trace.
pub fn is_thread_header(text: &str) -> bool {
    BEGIN_UNMANAGED_RE.is_match(text) || BEGIN_MANAGED_RE.is_match(text) || BEGIN_NOT_ATTACHED_RE.is_match(text)
}

// ============================================================================
// PARSER
// ============================================================================

/// Parses one thread block of a VM trace: the header line, `| ` attribute
/// lines and the stack. A blank line ends the thread.
pub struct ThreadSnapshotParser;

impl Default for ThreadSnapshotParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadSnapshotParser {
    pub fn new() -> Self {
        ThreadSnapshotParser
    }

    /// Returns `None` for an empty block.
    pub fn parse(&self, mut lines: Lines<'_, Line>, pid: u32) -> Result<Option<ThreadSnapshot>> {
        if !lines.has_next() {
            return Ok(None);
        }

        let mut thread = ThreadSnapshot {
            pid,
            ..ThreadSnapshot::default()
        };

        let header = lines.next()?;
        Self::parse_header(&header.text, &mut thread);

        // Attributes
        while lines.has_next() {
            let line = lines.next()?;
            let text = line.text.as_str();
            if let Some(caps) = match_captures(&HELD_MUTEXES_RE, text) {
                thread.held_mutexes = get_str(&caps, "mutexes");
            } else if let Some(caps) = match_captures(&ATTR_RE, text) {
                if let Some(caps) = match_captures(&SYS_TID_ATTR_RE, text) {
                    thread.sys_tid = get_int(&caps, "sys_tid", -1);
                }
                if STATE_RUNNABLE_ATTR_RE.is_match(text) {
                    thread.runnable = true;
                }
                thread.attribute_text.extend(get_str(&caps, "attr"));
            } else {
                lines.rewind();
                break;
            }
        }

        // Stack
        while lines.has_next() {
            let line = lines.next()?;
            let text = line.text.as_str();
            if text.trim().is_empty() {
                break;
            }
            if Self::attach_lock(text, &mut thread) {
                continue;
            }
            let kind = Self::parse_frame(text);
            if matches!(kind, FrameKind::Other) && !NO_MANAGED_FRAMES_RE.is_match(text) {
                trace!(lineno = line.lineno, "unrecognized stack line kept as raw text");
            }
            thread.frames.push(StackFrame {
                text: text.to_string(),
                kind,
            });
        }

        Ok(Some(thread))
    }

    fn parse_header(text: &str, thread: &mut ThreadSnapshot) {
        if let Some(caps) = match_captures(&BEGIN_UNMANAGED_RE, text) {
            thread.kind = ThreadKind::Unmanaged;
            thread.name = get_str(&caps, "name").unwrap_or_default();
            thread.sys_tid = get_int(&caps, "sys_tid", -1);
        } else if let Some(caps) = match_captures(&BEGIN_MANAGED_RE, text) {
            Self::fill_managed_header(&caps, thread);
            thread.tid = get_int(&caps, "tid", -1);
        } else if let Some(caps) = match_captures(&BEGIN_NOT_ATTACHED_RE, text) {
            Self::fill_managed_header(&caps, thread);
        } else {
            trace!(header = text, "thread block without a recognizable header");
        }
    }

    fn fill_managed_header(caps: &Captures<'_>, thread: &mut ThreadSnapshot) {
        thread.kind = ThreadKind::Managed;
        thread.name = get_str(caps, "name").unwrap_or_default();
        thread.daemon = get_str(caps, "daemon").filter(|d| !d.trim().is_empty());
        thread.priority = get_int(caps, "prio", -1);
        thread.vm_state = get_str(caps, "state").filter(|s| !s.is_empty());
    }

    fn parse_frame(text: &str) -> FrameKind {
        if let Some(caps) = match_captures(&NATIVE_RE, text) {
            return FrameKind::Native(NativeFrame {
                library: get_str(&caps, "library").unwrap_or_default(),
                symbol: get_str(&caps, "symbol"),
                offset: caps.name("offset").and_then(|m| m.as_str().parse().ok()),
            });
        }
        if let Some(caps) = match_captures(&NATIVE_NO_LOC_RE, text) {
            return FrameKind::Native(NativeFrame {
                library: get_str(&caps, "library").unwrap_or_default(),
                symbol: get_str(&caps, "symbol"),
                offset: None,
            });
        }
        if let Some(caps) = match_captures(&KERNEL_RE, text) {
            return FrameKind::Kernel(KernelFrame {
                syscall: get_str(&caps, "syscall"),
                offset0: Self::hex(&caps, "off0"),
                offset1: Self::hex(&caps, "off1"),
            });
        }
        if KERNEL_UNKNOWN_RE.is_match(text) {
            return FrameKind::Kernel(KernelFrame {
                syscall: None,
                offset0: 0,
                offset1: 0,
            });
        }
        if let Some(caps) = match_captures(&JAVA_RE, text) {
            return FrameKind::Java(Self::java_frame(&caps, JavaLanguage::Java, caps.name("line").and_then(|m| m.as_str().parse().ok())));
        }
        if let Some(caps) = match_captures(&JNI_RE, text) {
            return FrameKind::Java(Self::java_frame(&caps, JavaLanguage::Jni, None));
        }
        if let Some(caps) = match_captures(&JAVA_NO_LINE_RE, text) {
            return FrameKind::Java(Self::java_frame(&caps, JavaLanguage::Java, None));
        }
        FrameKind::Other
    }

    fn java_frame(caps: &Captures<'_>, language: JavaLanguage, source_line: Option<i32>) -> JavaFrame {
        JavaFrame {
            package_name: get_str(caps, "package"),
            class_name: get_str(caps, "class").unwrap_or_default(),
            method_name: get_str(caps, "method").unwrap_or_default(),
            source_file: get_str(caps, "file").filter(|f| !f.is_empty()),
            source_line,
            language,
            locks: Vec::new(),
        }
    }

    fn hex(caps: &Captures<'_>, name: &str) -> u64 {
        caps.name(name)
            .and_then(|m| u64::from_str_radix(m.as_str(), 16).ok())
            .unwrap_or(0)
    }

    /// Attaches a lock line to the Java frame right above it. Returns false
    /// if the text is not a lock line.
    fn attach_lock(text: &str, thread: &mut ThreadSnapshot) -> bool {
        let lock = if WAITING_TO_LOCK_UNKNOWN_RE.is_match(text) {
            LockSnapshot {
                flags: LockFlags::BLOCKED,
                ..LockSnapshot::default()
            }
        } else {
            let found = LOCK_PATTERNS
                .iter()
                .find_map(|(re, flags)| match_captures(re, text).map(|caps| (caps, *flags)));
            match found {
                Some((caps, flags)) => LockSnapshot {
                    flags,
                    address: get_str(&caps, "address"),
                    package_name: get_str(&caps, "package"),
                    class_name: get_str(&caps, "class"),
                    thread_id: caps.name("holder").and_then(|m| m.as_str().parse().ok()),
                },
                None => return false,
            }
        };

        // Any other frame in between orphans the lock line.
        let frame = thread.frames.last_mut().and_then(|f| match &mut f.kind {
            FrameKind::Java(java) => Some(java),
            _ => None,
        });
        match frame {
            Some(java) => java.locks.push(lock),
            None => trace!(lock = text, "lock line not right after a java frame"),
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ThreadSnapshot {
        let storage = Line::split(content);
        ThreadSnapshotParser::new()
            .parse(Lines::new(&storage), 1234)
            .unwrap()
            .unwrap()
    }

    const MAIN_THREAD: &str = r#""main" prio=5 tid=1 Blocked
  | group="main" sCount=1 dsCount=0 flags=1 obj=0x72f12a98 self=0xb400007e00001e50
  | sysTid=1234 nice=-10 cgrp=top-app sched=0/0 handle=0x7ff1234567
  | state=S schedstat=( 1234567890 987654321 1234 ) utm=123 stm=45 core=2 HZ=100
  | stack=0x7fff1234000-0x7fff1236000 stackSize=8188KB
  | held mutexes=
  at com.example.app.Cache.get(Cache.java:88)
  - waiting to lock <0x0c8a1f2e> (a java.lang.Object) held by thread 14
  at com.example.app.MainActivity.onResume(MainActivity.java:42)
  - locked <0x0d1e2f3a> (a com.example.app.MainActivity)
  at android.app.Activity.performResume(Activity.java:8000)
  at android.os.MessageQueue.nativePollOnce(Native method)
"#;

    #[test]
    fn test_parse_managed_thread() {
        let thread = parse(MAIN_THREAD);
        assert_eq!(thread.pid, 1234);
        assert_eq!(thread.kind, ThreadKind::Managed);
        assert_eq!(thread.name, "main");
        assert_eq!(thread.daemon, None);
        assert_eq!(thread.priority, 5);
        assert_eq!(thread.tid, 1);
        assert_eq!(thread.sys_tid, 1234);
        assert_eq!(thread.vm_state.as_deref(), Some("Blocked"));
        assert_eq!(thread.attribute_text.len(), 4);
        assert_eq!(thread.held_mutexes.as_deref(), Some(""));
        assert!(!thread.runnable);
        assert_eq!(thread.frames.len(), 4);
    }

    #[test]
    fn test_locks_attach_to_preceding_java_frame() {
        let thread = parse(MAIN_THREAD);
        let cache = thread.frames[0].as_java().unwrap();
        assert_eq!(cache.signature(), "com.example.app.Cache.get");
        assert_eq!(cache.source_file.as_deref(), Some("Cache.java"));
        assert_eq!(cache.source_line, Some(88));
        assert_eq!(cache.locks.len(), 1);
        let blocked = &cache.locks[0];
        assert_eq!(blocked.flags, LockFlags::BLOCKED);
        assert_eq!(blocked.address.as_deref(), Some("0c8a1f2e"));
        assert_eq!(blocked.package_name.as_deref(), Some("java.lang"));
        assert_eq!(blocked.class_name.as_deref(), Some("Object"));
        assert_eq!(blocked.thread_id, Some(14));

        let resume = thread.frames[1].as_java().unwrap();
        assert_eq!(resume.locks[0].flags, LockFlags::LOCKED);
        assert_eq!(resume.locks[0].thread_id, None);

        let poll = thread.frames[3].as_java().unwrap();
        assert_eq!(poll.language, JavaLanguage::Jni);
        assert_eq!(poll.method_name, "nativePollOnce");
    }

    #[test]
    fn test_parse_daemon_runnable_thread() {
        let thread = parse(
            r#""Thread-2" daemon prio=5 tid=15 Runnable
  | group="main" sCount=0 dsCount=0 flags=0 obj=0x12f45678 self=0xb400007e12345678
  | sysTid=12360 nice=0 cgrp=default sched=0/0 handle=0x7f89abcdef
  | state=R schedstat=( 1 2 3 ) utm=0 stm=0 core=1 HZ=100
  at com.example.app.BackgroundTask.run(BackgroundTask.java:50)"#,
        );
        assert_eq!(thread.daemon.as_deref(), Some("daemon"));
        assert_eq!(thread.tid, 15);
        assert_eq!(thread.sys_tid, 12360);
        assert!(thread.runnable);
    }

    #[test]
    fn test_parse_native_frames() {
        let thread = parse(
            r#""GC" daemon prio=10 tid=3 Native
  | group="system" sCount=1 dsCount=0 flags=1 obj=0x12345678 self=0xb400007e87654321
  native: #00 pc 00000000000c9ebc  /apex/com.android.runtime/lib64/bionic/libc.so (__pthread_start(void*)+204) (BuildId: 5f89913e15aa7088d03682fa8322b310)
  native: #01 pc 000000000005dc60  /system/lib64/libart.so
  kernel: __switch_to+0x8c/0xa0
  kernel: (couldn't read /proc/self/task/4321/stack)"#,
        );
        assert_eq!(thread.frames.len(), 4);
        match &thread.frames[0].kind {
            FrameKind::Native(native) => {
                assert_eq!(native.library, "/apex/com.android.runtime/lib64/bionic/libc.so");
                assert_eq!(native.symbol.as_deref(), Some("__pthread_start(void*)"));
                assert_eq!(native.offset, Some(204));
            }
            other => panic!("expected native frame, got {:?}", other),
        }
        match &thread.frames[1].kind {
            FrameKind::Native(native) => {
                assert_eq!(native.library, "/system/lib64/libart.so");
                assert_eq!(native.symbol, None);
            }
            other => panic!("expected native frame, got {:?}", other),
        }
        match &thread.frames[2].kind {
            FrameKind::Kernel(kernel) => {
                assert_eq!(kernel.syscall.as_deref(), Some("__switch_to"));
                assert_eq!(kernel.offset0, 0x8c);
                assert_eq!(kernel.offset1, 0xa0);
            }
            other => panic!("expected kernel frame, got {:?}", other),
        }
        assert!(matches!(
            &thread.frames[3].kind,
            FrameKind::Kernel(KernelFrame { syscall: None, .. })
        ));
    }

    #[test]
    fn test_parse_unmanaged_and_not_attached_headers() {
        let unmanaged = parse(r#""binder:1234_2" sysTid=1250"#);
        assert_eq!(unmanaged.kind, ThreadKind::Unmanaged);
        assert_eq!(unmanaged.name, "binder:1234_2");
        assert_eq!(unmanaged.sys_tid, 1250);
        assert_eq!(unmanaged.tid, -1);

        let detached = parse(r#""Jit thread pool" daemon prio=5 (not attached)"#);
        assert_eq!(detached.kind, ThreadKind::Managed);
        assert_eq!(detached.priority, 5);
        assert_eq!(detached.tid, -1);
        assert_eq!(detached.vm_state.as_deref(), Some("(not attached)"));
    }

    #[test]
    fn test_unknown_lines_are_kept_and_blank_line_ends_thread() {
        let thread = parse(
            "\"main\" prio=5 tid=1 Native\n  (no managed stack frames)\n  something odd\n\n  at a.B.c(B.java:1)",
        );
        assert_eq!(thread.frames.len(), 2);
        assert!(matches!(thread.frames[0].kind, FrameKind::Other));
        assert_eq!(thread.frames[1].text, "  something odd");
    }

    #[test]
    fn test_waiting_to_lock_unknown_object() {
        let thread = parse(
            "\"main\" prio=5 tid=1 Blocked\n  at a.B.c(B.java:1)\n  - waiting to lock an unknown object",
        );
        let lock = &thread.frames[0].as_java().unwrap().locks[0];
        assert_eq!(lock.flags, LockFlags::BLOCKED);
        assert_eq!(lock.key(), "");
    }

    #[test]
    fn test_lock_after_non_java_frame_is_dropped() {
        let thread = parse(
            "\"main\" prio=5 tid=1 Blocked\n  at a.B.c(B.java:1)\n  native: #00 pc 000000000005dc60  /system/lib64/libart.so\n  - waiting to lock <0x0c8a1f2e> (a java.lang.Object) held by thread 14\n  at a.B.d(B.java:2)\n  - locked <0x0d1e2f3a> (a a.B)",
        );
        assert_eq!(thread.frames.len(), 3);
        assert!(thread.frames[0].as_java().unwrap().locks.is_empty());
        let locks = &thread.frames[2].as_java().unwrap().locks;
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].flags, LockFlags::LOCKED);
    }

    #[test]
    fn test_empty_block() {
        let storage: Vec<Line> = Vec::new();
        assert!(ThreadSnapshotParser::new().parse(Lines::new(&storage), 1).unwrap().is_none());
    }

    #[test]
    fn test_is_thread_header() {
        assert!(is_thread_header(r#""main" prio=5 tid=1 Native"#));
        assert!(is_thread_header(r#""Signal Catcher" daemon prio=10 tid=6 WaitingInMainSignalCatcherLoop"#));
        assert!(!is_thread_header("  at a.B.c(B.java:1)"));
        assert!(!is_thread_header("----- pid 12 at 2016-01-01 00:00:00 -----"));
    }

    #[test]
    fn test_lock_flags() {
        let mut flags = LockFlags::LOCKED;
        flags |= LockFlags::BLOCKED;
        assert!(flags.contains(LockFlags::BLOCKED));
        assert!(flags.contains(LockFlags::LOCKED));
        assert!(!flags.contains(LockFlags::WAITING));
        assert_eq!((LockFlags::WAITING | LockFlags::SLEEPING).bits(), 6);
    }
}
