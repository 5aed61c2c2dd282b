use crate::error::Result;
use crate::storage::{RegionSummary, query_region_summary, region_count, schema, timeline_ms};
use rusqlite::Connection;
use std::path::Path;

pub fn run(file: &Path, by_origin: bool, json: bool, csv: bool) -> Result<()> {
    let conn = Connection::open(file)?;
    let entries = query_region_summary(&conn, by_origin)?;

    if entries.is_empty() {
        eprintln!("No regions recorded in {}", file.display());
        return Ok(());
    }

    let header = Header {
        force_collect: schema::get_meta(&conn, "force_collect")?.unwrap_or_default(),
        count: schema::get_meta(&conn, "count")?.unwrap_or_default(),
        regions: region_count(&conn)?,
        timeline_ms: timeline_ms(&conn)?,
        scratch_bytes: meta_u64(&conn, "kdf_scratch_bytes")?,
        heap_allocated_bytes: meta_u64(&conn, "heap_allocated_bytes")?,
        heap_allocations: meta_u64(&conn, "heap_allocations")?,
    };

    if json {
        print_json(file, &header, &entries);
    } else if csv {
        print_csv(&entries);
    } else {
        print_table(file, &header, &entries);
    }

    Ok(())
}

struct Header {
    force_collect: String,
    count: String,
    regions: u64,
    timeline_ms: f64,
    /// Scratch memory one derivation needs
    scratch_bytes: Option<u64>,
    /// Process-lifetime heap totals, stamped when the trace closed
    heap_allocated_bytes: Option<u64>,
    heap_allocations: Option<u64>,
}

fn meta_u64(conn: &Connection, key: &str) -> Result<Option<u64>> {
    Ok(schema::get_meta(conn, key)?.and_then(|v| v.parse().ok()))
}

fn print_table(file: &Path, header: &Header, entries: &[RegionSummary]) {
    println!("# {}", file.display());
    println!(
        "# force={} | count={} | regions={} | timeline={}",
        header.force_collect,
        header.count,
        header.regions,
        format_ms(header.timeline_ms)
    );
    if let Some(scratch) = header.scratch_bytes {
        println!("# scratch per derive={}", format_size(scratch as f64));
    }
    // Zero totals mean the counting allocator was not installed
    if let (Some(bytes), Some(allocs)) = (header.heap_allocated_bytes, header.heap_allocations)
        && allocs > 0
    {
        println!(
            "# heap allocated={} in {} allocations",
            format_size(bytes as f64),
            allocs
        );
    }
    println!();

    println!(
        "{:<14}  {:>6}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}  ORIGIN",
        "REGION", "COUNT", "TOTAL", "MEAN", "MIN", "MAX", "HEAP"
    );
    println!("{}", "-".repeat(96));

    for entry in entries {
        println!(
            "{:<14}  {:>6}  {:>10}  {:>10}  {:>10}  {:>10}  {:>10}  {}",
            entry.name,
            entry.count,
            format_ms(entry.total_ms),
            format_ms(entry.mean_ms),
            format_ms(entry.min_ms),
            format_ms(entry.max_ms),
            format_bytes(entry.mean_heap_delta),
            entry.origin.as_deref().unwrap_or("*"),
        );
    }
}

fn print_json(file: &Path, header: &Header, entries: &[RegionSummary]) {
    println!("{{");
    println!("  \"file\": \"{}\",", escape(&file.display().to_string()));
    println!("  \"force_collect\": \"{}\",", escape(&header.force_collect));
    println!("  \"count\": \"{}\",", escape(&header.count));
    println!("  \"regions\": {},", header.regions);
    println!("  \"timeline_ms\": {:.3},", header.timeline_ms);
    println!("  \"scratch_bytes\": {},", json_u64(header.scratch_bytes));
    println!("  \"heap_allocated_bytes\": {},", json_u64(header.heap_allocated_bytes));
    println!("  \"heap_allocations\": {},", json_u64(header.heap_allocations));
    println!("  \"entries\": [");

    for (i, entry) in entries.iter().enumerate() {
        let comma = if i < entries.len() - 1 { "," } else { "" };
        let origin = match &entry.origin {
            Some(o) => format!("\"{}\"", escape(o)),
            None => "null".to_string(),
        };
        println!(
            "    {{ \"region\": \"{}\", \"origin\": {}, \"count\": {}, \"total_ms\": {:.3}, \"mean_ms\": {:.3}, \"min_ms\": {:.3}, \"max_ms\": {:.3}, \"mean_heap_delta\": {:.0} }}{}",
            escape(&entry.name),
            origin,
            entry.count,
            entry.total_ms,
            entry.mean_ms,
            entry.min_ms,
            entry.max_ms,
            entry.mean_heap_delta,
            comma
        );
    }

    println!("  ]");
    println!("}}");
}

fn print_csv(entries: &[RegionSummary]) {
    println!("region,origin,count,total_ms,mean_ms,min_ms,max_ms,mean_heap_delta");
    for entry in entries {
        println!("{}", csv_row(entry));
    }
}

fn csv_row(entry: &RegionSummary) -> String {
    format!(
        "{},{},{},{:.3},{:.3},{:.3},{:.3},{:.0}",
        csv_field(&entry.name),
        csv_field(entry.origin.as_deref().unwrap_or("")),
        entry.count,
        entry.total_ms,
        entry.mean_ms,
        entry.min_ms,
        entry.max_ms,
        entry.mean_heap_delta
    )
}

/// Quote a text field, doubling embedded quotes (RFC 4180)
fn csv_field(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn json_u64(value: Option<u64>) -> String {
    value.map_or_else(|| "null".to_string(), |v| v.to_string())
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Milliseconds, switching to seconds past 10s
fn format_ms(ms: f64) -> String {
    if ms >= 10_000.0 {
        format!("{:.1}s", ms / 1000.0)
    } else if ms >= 100.0 {
        format!("{:.0}ms", ms)
    } else {
        format!("{:.2}ms", ms)
    }
}

/// Signed byte delta, human readable
fn format_bytes(bytes: f64) -> String {
    let sign = if bytes < 0.0 { "-" } else { "+" };
    format!("{}{}", sign, format_size(bytes.abs()))
}

fn format_size(bytes: f64) -> String {
    if bytes >= 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2}G", bytes / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024.0 * 1024.0 {
        format!("{:.2}M", bytes / (1024.0 * 1024.0))
    } else if bytes >= 1024.0 {
        format!("{:.1}K", bytes / 1024.0)
    } else {
        format!("{:.0}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TraceFile;
    use crate::storage::writer::tests::{meta, region};

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(1.5), "1.50ms");
        assert_eq!(format_ms(512.4), "512ms");
        assert_eq!(format_ms(12_500.0), "12.5s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0.0), "+0B");
        assert_eq!(format_bytes(2048.0), "+2.0K");
        assert_eq!(format_bytes(-128.0 * 1024.0 * 1024.0), "-128.00M");
        assert_eq!(format_size(128.0 * 1024.0 * 1024.0), "128.00M");
    }

    #[test]
    fn test_csv_quotes_text_fields() {
        assert_eq!(csv_field("derive"), "\"derive\"");
        assert_eq!(csv_field("http at \"x\""), "\"http at \"\"x\"\"\"");

        let entry = RegionSummary {
            name: "a,b".to_string(),
            origin: None,
            count: 2,
            total_ms: 3.0,
            mean_ms: 1.5,
            min_ms: 1.0,
            max_ms: 2.0,
            mean_heap_delta: -512.0,
        };
        assert_eq!(csv_row(&entry), "\"a,b\",\"\",2,3.000,1.500,1.000,2.000,-512");
    }

    #[test]
    fn test_header_reads_size_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        TraceFile::create(&path, &meta()).unwrap().close().unwrap();

        let conn = Connection::open(&path).unwrap();
        assert_eq!(meta_u64(&conn, "kdf_scratch_bytes").unwrap(), Some(128 * 1024 * 1024));
        assert!(meta_u64(&conn, "heap_allocations").unwrap().is_some());
        assert_eq!(meta_u64(&conn, "missing").unwrap(), None);
        assert_eq!(json_u64(None), "null");
    }

    #[test]
    fn test_run_on_recorded_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        let mut file = TraceFile::create(&path, &meta()).unwrap();
        file.record(region(0, "startup", "derive", 0, 1_000_000));
        file.record(region(0, "startup", "force-collect", 1_000_000, 1_000_000));
        file.close().unwrap();

        run(&path, false, false, false).unwrap();
        run(&path, true, true, false).unwrap();
        run(&path, false, false, true).unwrap();
    }

    #[test]
    fn test_run_on_empty_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kdfprobe.test.db");
        TraceFile::create(&path, &meta()).unwrap().close().unwrap();

        run(&path, false, false, false).unwrap();
    }
}
