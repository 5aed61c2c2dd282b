//! Background thread that drains regions into a [`TraceFile`].
//!
//! Invocation threads only pay for a channel send. The writer commits a batch
//! every flush interval or every [`FLUSH_BATCH`] regions, whichever comes first.

use super::writer::TraceFile;
use crate::error::{Error, Result};
use kdfprobe_trace::{RegionRecord, TraceSink};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const FLUSH_BATCH: usize = 512;

enum Message {
    Region(RegionRecord),
    Stop,
}

struct ChannelSink {
    tx: Sender<Message>,
}

impl TraceSink for ChannelSink {
    fn record(&self, region: RegionRecord) {
        // Fails only once the writer is gone; late regions are dropped
        let _ = self.tx.send(Message::Region(region));
    }
}

pub struct TraceWriter {
    tx: Sender<Message>,
    handle: JoinHandle<Result<u64>>,
}

impl TraceWriter {
    pub fn spawn(file: TraceFile, interval: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("trace-writer".to_string())
            .spawn(move || write_loop(file, rx, interval))?;
        Ok(TraceWriter { tx, handle })
    }

    /// A sink feeding this writer
    pub fn sink(&self) -> Arc<dyn TraceSink> {
        Arc::new(ChannelSink {
            tx: self.tx.clone(),
        })
    }

    /// Stop accepting regions, flush, and close the file.
    ///
    /// Returns the number of regions written.
    pub fn finish(self) -> Result<u64> {
        let _ = self.tx.send(Message::Stop);
        self.handle
            .join()
            .map_err(|_| Error::TraceWriter("writer thread panicked".to_string()))?
    }
}

fn write_loop(
    mut file: TraceFile,
    rx: mpsc::Receiver<Message>,
    interval: Duration,
) -> Result<u64> {
    let mut last_flush = Instant::now();

    loop {
        let timeout = interval.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(timeout) {
            Ok(Message::Region(region)) => file.record(region),
            Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if file.pending() >= FLUSH_BATCH || last_flush.elapsed() >= interval {
            if let Err(e) = file.flush() {
                tracing::error!("trace flush failed: {e}");
                return Err(e);
            }
            last_flush = Instant::now();
        }
    }

    file.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::writer::tests::{meta, region};
    use crate::storage::{query_region_summary, region_count};
    use kdfprobe_trace::Tracer;
    use rusqlite::Connection;

    #[test]
    fn test_finish_flushes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let file = TraceFile::create(&path, &meta()).unwrap();
        // Interval long enough that only finish() flushes
        let writer = TraceWriter::spawn(file, Duration::from_secs(3600)).unwrap();

        let sink = writer.sink();
        for task in 0..10 {
            sink.record(region(task, "startup", "derive", task * 10, task * 10 + 5));
        }

        assert_eq!(writer.finish().unwrap(), 10);
        let conn = Connection::open(&path).unwrap();
        assert_eq!(region_count(&conn).unwrap(), 10);
    }

    #[test]
    fn test_interval_flush_visible_before_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let file = TraceFile::create(&path, &meta()).unwrap();
        let writer = TraceWriter::spawn(file, Duration::from_millis(20)).unwrap();

        writer
            .sink()
            .record(region(0, "startup", "derive", 0, 1_000));

        let conn = Connection::open(&path).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while region_count(&conn).unwrap_or(0) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(region_count(&conn).unwrap(), 1);

        writer.finish().unwrap();
    }

    #[test]
    fn test_records_after_finish_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let file = TraceFile::create(&path, &meta()).unwrap();
        let writer = TraceWriter::spawn(file, Duration::from_secs(1)).unwrap();
        let tracer = Tracer::new(writer.sink());

        tracer.with_region(0, "startup", "derive", || {});
        assert_eq!(writer.finish().unwrap(), 1);

        // Abandoned invocation closing a region after shutdown
        tracer.with_region(1, "startup", "derive", || {});

        let conn = Connection::open(&path).unwrap();
        let summary = query_region_summary(&conn, false).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 1);
    }
}
