//! Observation sink (C8): fans `RequestRecord`s out to an append-only
//! JSON-lines file and zero or more in-process subscribers, never blocking
//! the proxy path on a slow one.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::models::RequestRecord;

/// A subscriber interface with one method, per the design's "callback
/// fan-out to dashboard" note — the sink keeps a list of these and never
/// awaits one from the proxy's own request path.
pub trait Sink: Send + Sync {
    fn emit(&self, record: &RequestRecord);
}

/// Append-only JSON-lines file writer. Opened in append mode; each record
/// is one compact JSON object, flushed immediately so a crash doesn't lose
/// the last few lines.
pub struct JsonlFileSink {
    file: Mutex<File>,
}

impl JsonlFileSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(Error::TransportError)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::TransportError)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl Sink for JsonlFileSink {
    fn emit(&self, record: &RequestRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("sink: failed to serialize record: {}", e);
                return;
            }
        };
        let mut file = self.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{}", line) {
            tracing::warn!("sink: failed to write record: {}", e);
            return;
        }
        let _ = file.flush();
    }
}

/// Bounded ring buffer standing in for a slow in-process subscriber (the
/// embedded dashboard this would feed is out of scope here). Back-pressure
/// policy is drop-oldest: a full buffer discards its oldest entry to make
/// room for the new one, rather than blocking the caller.
pub struct RingBufferSubscriber {
    queue: Mutex<VecDeque<RequestRecord>>,
    capacity: usize,
}

impl RingBufferSubscriber {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn drain(&self) -> Vec<RequestRecord> {
        self.queue.lock().unwrap().drain(..).collect()
    }
}

impl Sink for RingBufferSubscriber {
    fn emit(&self, record: &RequestRecord) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(record.clone());
    }
}

/// Colorized one-line human summary, purely for terminal display — the
/// embedded dashboard's text-mode stand-in. Rendering only, no effect on
/// the proxy path.
pub struct TerminalSink;

impl Sink for TerminalSink {
    fn emit(&self, record: &RequestRecord) {
        use console::style;

        let method = style(&record.method).cyan().bold();
        let status = record
            .status_code
            .map(|code| match code {
                200..=299 => style(code.to_string()).green().to_string(),
                300..=399 => style(code.to_string()).yellow().to_string(),
                400..=599 => style(code.to_string()).red().to_string(),
                _ => code.to_string(),
            })
            .unwrap_or_else(|| "-".to_string());
        let mark = if record.watched {
            style("W").magenta().to_string()
        } else {
            " ".to_string()
        };

        println!("[{}] {} {} {} {}", mark, method, record.host, record.path, status);
    }
}

/// Fans a record out to every configured sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn Sink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Sink for FanoutSink {
    fn emit(&self, record: &RequestRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_file_sink_appends_compact_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = JsonlFileSink::open(&path).unwrap();

        sink.emit(&RequestRecord::new("GET", "example.test", "/", false));
        sink.emit(&RequestRecord::new("POST", "example.test", "/x", true));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"method\":\"GET\""));
    }

    #[test]
    fn ring_buffer_drops_oldest_when_full() {
        let sub = RingBufferSubscriber::new(2);
        sub.emit(&RequestRecord::new("GET", "a", "/", false));
        sub.emit(&RequestRecord::new("GET", "b", "/", false));
        sub.emit(&RequestRecord::new("GET", "c", "/", false));

        let drained = sub.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].host, "b");
        assert_eq!(drained[1].host, "c");
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file_sink = JsonlFileSink::open(&path).unwrap();
        let ring = RingBufferSubscriber::new(10);

        let fanout = FanoutSink::new().add(Box::new(file_sink));
        // RingBufferSubscriber isn't Box<dyn Sink> movable here without
        // giving up the local handle, so fan out manually in the test.
        let record = RequestRecord::new("GET", "example.test", "/", false);
        fanout.emit(&record);
        ring.emit(&record);

        assert_eq!(ring.drain().len(), 1);
        assert!(std::fs::read_to_string(&path).unwrap().contains("example.test"));
    }
}
