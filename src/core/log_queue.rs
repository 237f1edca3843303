//! Purpose: Queue log records from anywhere in a worker and emit them on the event loop's drain tick.
//! Exports: `LogQueue`, `LogSender`, `LogRecord`, `LogLevel`.
//! Role: Transport seam between producers that must not block and the single tracing emitter.
//! Invariants: Sending never blocks and never fails loudly; a closed queue drops records.
//! Invariants: Draining emits records in the order they were sent.

use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub origin: String,
    pub message: String,
    pub time: String,
    pub pid: u32,
}

#[derive(Clone, Debug)]
pub struct LogSender {
    tx: Sender<LogRecord>,
}

impl LogSender {
    pub fn send(&self, level: LogLevel, origin: impl Into<String>, message: impl Into<String>) {
        let record = LogRecord {
            level,
            origin: origin.into(),
            message: message.into(),
            time: now_rfc3339(),
            pid: std::process::id(),
        };
        let _ = self.tx.send(record);
    }
}

#[derive(Debug)]
pub struct LogQueue {
    tx: Sender<LogRecord>,
    rx: Mutex<Receiver<LogRecord>>,
}

impl LogQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> LogSender {
        LogSender {
            tx: self.tx.clone(),
        }
    }

    /// Takes everything currently queued without waiting.
    pub fn take(&self) -> Vec<LogRecord> {
        let Ok(rx) = self.rx.lock() else {
            return Vec::new();
        };
        let mut records = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(record) => records.push(record),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        records
    }

    /// Emits every queued record through `tracing`; returns how many were emitted.
    pub fn drain(&self) -> usize {
        let records = self.take();
        for record in &records {
            emit(record);
        }
        records.len()
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(record: &LogRecord) {
    let LogRecord {
        origin,
        message,
        time,
        pid,
        ..
    } = record;
    match record.level {
        LogLevel::Error => tracing::error!(origin = %origin, pid, at = %time, "{message}"),
        LogLevel::Warn => tracing::warn!(origin = %origin, pid, at = %time, "{message}"),
        LogLevel::Info => tracing::info!(origin = %origin, pid, at = %time, "{message}"),
        LogLevel::Debug => tracing::debug!(origin = %origin, pid, at = %time, "{message}"),
        LogLevel::Trace => tracing::trace!(origin = %origin, pid, at = %time, "{message}"),
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
