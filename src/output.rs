//! Event output
//!
//! Fetched records are written one JSON document per line. Splunk reads
//! them from stdout in simple streaming mode.

use serde_json::Value;
use std::io::{self, BufWriter, Write};

/// Destination for fetched records
pub trait EventSink: Send {
    /// Write one record
    fn emit(&mut self, event: &Value) -> io::Result<()>;

    /// Push buffered records to the underlying writer
    fn flush(&mut self) -> io::Result<()>;
}

/// Writes each event as a single line of JSON
pub struct JsonLinesSink<W: Write + Send> {
    writer: BufWriter<W>,
    events_written: u64,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
            events_written: 0,
        }
    }

    /// Number of events emitted so far
    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Flush and return the underlying writer
    pub fn into_inner(self) -> io::Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error())
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &Value) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.events_written += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Holds one fetch's records until the fetch has succeeded
#[derive(Debug, Default)]
pub struct PendingEvents {
    events: Vec<Value>,
}

impl PendingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Write every held record to `sink`, returning how many were written
    pub fn commit(self, sink: &mut dyn EventSink) -> io::Result<usize> {
        for event in &self.events {
            sink.emit(event)?;
        }
        Ok(self.events.len())
    }
}

impl EventSink for PendingEvents {
    fn emit(&mut self, event: &Value) -> io::Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
