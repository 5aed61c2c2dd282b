use crate::error::Result;
use crate::storage::{region_count, schema};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Trace info extracted from a database file
pub struct TraceInfo {
    pub path: PathBuf,
    pub started: String,
    pub force_collect: bool,
    pub count: u64,
    pub regions: u64,
}

/// Find all kdfprobe trace databases in a directory, newest first
pub fn find_traces(dir: &Path) -> Result<Vec<TraceInfo>> {
    let mut traces = Vec::new();

    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let is_trace = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with("kdfprobe.") && name.ends_with(".db"));

        // Files that fail to open are not ours; skip them quietly
        if is_trace && let Ok(info) = trace_info(&path) {
            traces.push(info);
        }
    }

    // RFC 3339 timestamps sort chronologically
    traces.sort_by(|a, b| b.started.cmp(&a.started));

    Ok(traces)
}

fn trace_info(path: &Path) -> Result<TraceInfo> {
    let conn = Connection::open(path)?;

    let started = schema::get_meta(&conn, "start_time")?.unwrap_or_else(|| "unknown".to_string());
    let force_collect = schema::get_meta(&conn, "force_collect")?
        .is_some_and(|v| v == "true");
    let count = schema::get_meta(&conn, "count")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(TraceInfo {
        path: path.to_path_buf(),
        started,
        force_collect,
        count,
        regions: region_count(&conn)?,
    })
}

/// Run the list command
pub fn run(dir: Option<&Path>) -> Result<()> {
    let search_dir = dir.unwrap_or_else(|| Path::new("."));
    let traces = find_traces(search_dir)?;

    if traces.is_empty() {
        println!("No kdfprobe traces found in {}", search_dir.display());
        return Ok(());
    }

    println!(
        "{:<34} {:<26} {:>6} {:>6} {:>8}",
        "FILE", "STARTED", "FORCE", "COUNT", "REGIONS"
    );
    println!("{}", "-".repeat(84));

    for trace in traces {
        let filename = trace
            .path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        // Drop sub-second precision from the RFC 3339 stamp
        let started = trace.started.split('.').next().unwrap_or(trace.started.as_str());

        println!(
            "{:<34} {:<26} {:>6} {:>6} {:>8}",
            filename,
            started,
            if trace.force_collect { "yes" } else { "no" },
            trace.count,
            trace.regions
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TraceFile;
    use crate::storage::writer::tests::{meta, region};

    #[test]
    fn test_find_traces_filters_by_name() {
        let dir = tempfile::tempdir().unwrap();

        let mut file = TraceFile::create(&dir.path().join("kdfprobe.a.db"), &meta()).unwrap();
        file.record(region(0, "startup", "derive", 0, 10));
        file.close().unwrap();
        std::fs::write(dir.path().join("other.db"), b"not a trace").unwrap();
        std::fs::write(dir.path().join("kdfprobe.txt"), b"").unwrap();

        let traces = find_traces(dir.path()).unwrap();
        assert_eq!(traces.len(), 1);
        assert!(traces[0].force_collect);
        assert_eq!(traces[0].count, 3);
        assert_eq!(traces[0].regions, 1);
    }

    #[test]
    fn test_run_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        run(Some(dir.path())).unwrap();
    }
}
