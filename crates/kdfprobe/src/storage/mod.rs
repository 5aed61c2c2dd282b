mod recorder;
pub(crate) mod schema;
pub mod writer;

pub use recorder::TraceWriter;
pub use writer::{
    RegionSummary, TraceFile, TraceMeta, query_region_summary, region_count, timeline_ms,
};
