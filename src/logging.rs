use crate::types::NodeId;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity levels for subsystem log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rotation policy for in-memory log segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRotationPolicy {
    pub max_bytes: usize,
    pub max_segments: usize,
}

impl Default for LogRotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 1 << 20,
            max_segments: 4,
        }
    }
}

/// One rotated batch of log lines.
#[derive(Debug, Default, Clone)]
pub struct LogSegment {
    lines: Vec<String>,
    bytes_written: usize,
}

impl LogSegment {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    ts_ms: u64,
    level: &'a str,
    module: &'a str,
    node: String,
    message: &'a str,
}

#[derive(Debug)]
struct LogState {
    level: LogLevel,
    segments: VecDeque<LogSegment>,
    active: LogSegment,
}

/// JSON-line logger shared by the close cycle, the pool, and the server.
///
/// Lines are kept in rotated in-memory segments; the embedding process
/// drains them to its own sink. An unserializable record is dropped rather
/// than propagated, so logging can never fail a caller.
#[derive(Debug, Clone)]
pub struct SubsystemLog {
    node: NodeId,
    policy: LogRotationPolicy,
    state: Arc<Mutex<LogState>>,
}

impl SubsystemLog {
    pub fn new(node: NodeId) -> Self {
        Self::with_policy(node, LogRotationPolicy::default())
    }

    pub fn with_policy(node: NodeId, policy: LogRotationPolicy) -> Self {
        Self {
            node,
            policy,
            state: Arc::new(Mutex::new(LogState {
                level: LogLevel::Info,
                segments: VecDeque::new(),
                active: LogSegment::default(),
            })),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.state.lock().unwrap().level
    }

    pub fn set_level(&self, level: LogLevel) {
        self.state.lock().unwrap().level = level;
    }

    pub fn debug(&self, module: &str, message: &str) {
        self.log(LogLevel::Debug, module, message);
    }

    pub fn info(&self, module: &str, message: &str) {
        self.log(LogLevel::Info, module, message);
    }

    pub fn warn(&self, module: &str, message: &str) {
        self.log(LogLevel::Warn, module, message);
    }

    pub fn error(&self, module: &str, message: &str) {
        self.log(LogLevel::Error, module, message);
    }

    /// Emits one JSON line, rotating the active segment when full.
    pub fn log(&self, level: LogLevel, module: &str, message: &str) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        if level < state.level {
            return;
        }
        let record = LogRecord {
            ts_ms: wall_ms(),
            level: level.as_str(),
            module,
            node: self.node.to_string(),
            message,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(_) => return,
        };
        if state.active.bytes_written + line.len() > self.policy.max_bytes
            && !state.active.lines.is_empty()
        {
            let rotated = std::mem::take(&mut state.active);
            state.segments.push_back(rotated);
            while state.segments.len() > self.policy.max_segments {
                state.segments.pop_front();
            }
        }
        state.active.bytes_written = state.active.bytes_written.saturating_add(line.len());
        state.active.lines.push(line);
    }

    /// Copies the rotated history plus the active segment.
    pub fn segments(&self) -> Vec<LogSegment> {
        let state = self.state.lock().unwrap();
        let mut all: Vec<LogSegment> = state.segments.iter().cloned().collect();
        all.push(state.active.clone());
        all
    }

    /// All retained lines in emission order.
    pub fn lines(&self) -> Vec<String> {
        self.segments()
            .iter()
            .flat_map(|segment| segment.lines().iter().cloned())
            .collect()
    }
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}
