use super::schema::{self, SCHEMA_VERSION};
use crate::config::RunConfig;
use crate::error::Result;
use crate::kdf::KdfParams;
use kdfprobe_trace::{RegionRecord, heap};
use rusqlite::Connection;
use std::path::Path;

/// Run metadata stored alongside the regions
#[derive(Debug, Clone)]
pub struct TraceMeta {
    pub config: RunConfig,
    pub params: KdfParams,
    pub addr: String,
}

/// SQLite trace database
pub struct TraceFile {
    conn: Connection,
    /// Regions received since the last flush
    pending: Vec<RegionRecord>,
    written: u64,
}

impl TraceFile {
    /// Create a new trace file, replacing any previous contents
    pub fn create(path: &Path, meta: &TraceMeta) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets `regions` read a trace that is still being written
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;

        schema::create_tables(&conn)?;

        schema::set_meta(&conn, "version", &SCHEMA_VERSION.to_string())?;
        schema::set_meta(&conn, "pid", &std::process::id().to_string())?;
        schema::set_meta(&conn, "start_time", &chrono::Utc::now().to_rfc3339())?;
        schema::set_meta(&conn, "force_collect", &meta.config.force_collect.to_string())?;
        schema::set_meta(&conn, "count", &meta.config.count.to_string())?;
        schema::set_meta(&conn, "kdf_log_n", &meta.params.log_n.to_string())?;
        schema::set_meta(&conn, "kdf_r", &meta.params.r.to_string())?;
        schema::set_meta(&conn, "kdf_p", &meta.params.p.to_string())?;
        schema::set_meta(&conn, "kdf_len", &meta.params.len.to_string())?;
        schema::set_meta(&conn, "kdf_scratch_bytes", &meta.params.scratch_bytes().to_string())?;
        schema::set_meta(&conn, "heap_counting", &heap::is_counting().to_string())?;
        schema::set_meta(&conn, "addr", &meta.addr)?;

        Ok(TraceFile {
            conn,
            pending: Vec::new(),
            written: 0,
        })
    }

    /// Queue a region for the next flush
    pub fn record(&mut self, region: RegionRecord) {
        self.pending.push(region);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write pending regions in one transaction
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO regions (task, origin, name, thread, start_ns, end_ns, heap_live_start, heap_live_end) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for region in &self.pending {
                stmt.execute(rusqlite::params![
                    region.task as i64,
                    &region.origin,
                    region.name,
                    region.thread.as_deref(),
                    region.start_ns as i64,
                    region.end_ns as i64,
                    region.heap_live_start as i64,
                    region.heap_live_end as i64,
                ])?;
            }
        }
        tx.commit()?;

        self.written += self.pending.len() as u64;
        self.pending.clear();
        Ok(())
    }

    /// Flush, then stamp the end time and process-lifetime heap totals
    pub fn close(mut self) -> Result<u64> {
        self.flush()?;
        let totals = heap::snapshot();
        schema::set_meta(&self.conn, "end_time", &chrono::Utc::now().to_rfc3339())?;
        schema::set_meta(&self.conn, "heap_allocated_bytes", &totals.allocated_bytes.to_string())?;
        schema::set_meta(&self.conn, "heap_allocations", &totals.allocations.to_string())?;
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(self.written)
    }
}

/// Aggregated durations for one region name (and origin, if grouped)
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub name: String,
    pub origin: Option<String>,
    pub count: u64,
    pub total_ms: f64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Mean change in process heap live bytes across the region
    pub mean_heap_delta: f64,
}

/// Summarize regions by name, optionally split by origin
pub fn query_region_summary(
    conn: &Connection,
    by_origin: bool,
) -> rusqlite::Result<Vec<RegionSummary>> {
    let (select_origin, group_by, order_by) = if by_origin {
        ("origin", "name, origin", "MIN(start_ns), name")
    } else {
        ("NULL", "name", "name")
    };

    let sql = format!(
        r#"
        SELECT name,
               {select_origin},
               COUNT(*),
               SUM(end_ns - start_ns),
               MIN(end_ns - start_ns),
               MAX(end_ns - start_ns),
               AVG(CAST(heap_live_end AS REAL) - heap_live_start)
        FROM regions
        GROUP BY {group_by}
        ORDER BY {order_by}
        "#
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let count: i64 = row.get(2)?;
        let total_ns: i64 = row.get(3)?;
        let min_ns: i64 = row.get(4)?;
        let max_ns: i64 = row.get(5)?;
        let total_ms = total_ns as f64 / 1e6;
        Ok(RegionSummary {
            name: row.get(0)?,
            origin: row.get(1)?,
            count: count as u64,
            total_ms,
            mean_ms: if count > 0 { total_ms / count as f64 } else { 0.0 },
            min_ms: min_ns as f64 / 1e6,
            max_ms: max_ns as f64 / 1e6,
            mean_heap_delta: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
        })
    })?;

    rows.collect()
}

/// Number of regions in a trace
pub fn region_count(conn: &Connection) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM regions", [], |row| row.get(0))?;
    Ok(count as u64)
}

/// Span of the recorded timeline in milliseconds
pub fn timeline_ms(conn: &Connection) -> rusqlite::Result<f64> {
    let span: Option<i64> = conn.query_row(
        "SELECT MAX(end_ns) - MIN(start_ns) FROM regions",
        [],
        |row| row.get(0),
    )?;
    Ok(span.unwrap_or(0) as f64 / 1e6)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn meta() -> TraceMeta {
        TraceMeta {
            config: RunConfig::new(true, 3).unwrap(),
            params: KdfParams::WORKLOAD,
            addr: "127.0.0.1:8080".to_string(),
        }
    }

    pub(crate) fn region(task: u64, origin: &str, name: &'static str, start_ns: u64, end_ns: u64) -> RegionRecord {
        RegionRecord {
            task,
            origin: origin.to_string(),
            name,
            thread: Some(format!("invocation-{task}")),
            start_ns,
            end_ns,
            heap_live_start: 1000,
            heap_live_end: 3000,
        }
    }

    #[test]
    fn test_create_writes_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let file = TraceFile::create(&path, &meta()).unwrap();
        file.close().unwrap();

        let conn = Connection::open(&path).unwrap();
        assert_eq!(
            schema::get_meta(&conn, "force_collect").unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(schema::get_meta(&conn, "count").unwrap().as_deref(), Some("3"));
        assert_eq!(schema::get_meta(&conn, "kdf_log_n").unwrap().as_deref(), Some("17"));
        assert_eq!(
            schema::get_meta(&conn, "kdf_scratch_bytes").unwrap().as_deref(),
            Some("134217728")
        );
        assert!(schema::get_meta(&conn, "heap_counting").unwrap().is_some());
        assert!(schema::get_meta(&conn, "end_time").unwrap().is_some());
        let allocated: u64 = schema::get_meta(&conn, "heap_allocated_bytes")
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        let allocations: u64 = schema::get_meta(&conn, "heap_allocations")
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        // Zero unless the counting allocator is installed in this binary
        assert_eq!(allocated == 0, allocations == 0);
        assert!(schema::get_meta(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_flush_is_batched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let mut file = TraceFile::create(&path, &meta()).unwrap();

        file.record(region(0, "startup", "derive", 0, 4_000_000));
        file.record(region(0, "startup", "force-collect", 4_000_000, 5_000_000));
        assert_eq!(file.pending(), 2);
        assert_eq!(region_count(&file.conn).unwrap(), 0);

        file.flush().unwrap();
        assert_eq!(file.pending(), 0);
        assert_eq!(region_count(&file.conn).unwrap(), 2);

        file.record(region(1, "http at 10:00:00", "derive", 6_000_000, 9_000_000));
        assert_eq!(file.close().unwrap(), 3);
    }

    #[test]
    fn test_region_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let mut file = TraceFile::create(&path, &meta()).unwrap();
        file.record(region(0, "startup", "derive", 0, 2_000_000));
        file.record(region(0, "startup", "force-collect", 2_000_000, 3_000_000));
        file.record(region(1, "http at 10:00:00", "derive", 5_000_000, 9_000_000));
        file.record(region(1, "http at 10:00:00", "force-collect", 9_000_000, 9_000_000));
        file.close().unwrap();

        let conn = Connection::open(&path).unwrap();
        assert_eq!(region_count(&conn).unwrap(), 4);
        assert_eq!(timeline_ms(&conn).unwrap(), 9.0);

        let summary = query_region_summary(&conn, false).unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].name, "derive");
        assert_eq!(summary[0].count, 2);
        assert_eq!(summary[0].total_ms, 6.0);
        assert_eq!(summary[0].mean_ms, 3.0);
        assert_eq!(summary[0].min_ms, 2.0);
        assert_eq!(summary[0].max_ms, 4.0);
        assert_eq!(summary[0].mean_heap_delta, 2000.0);
        assert_eq!(summary[1].name, "force-collect");
        assert!(summary[1].origin.is_none());

        let by_origin = query_region_summary(&conn, true).unwrap();
        assert_eq!(by_origin.len(), 4);
        assert_eq!(by_origin[0].origin.as_deref(), Some("startup"));
        assert_eq!(by_origin[3].origin.as_deref(), Some("http at 10:00:00"));
    }
}
