//! Export Pipeline: plan (pure) then stream (I/O).

pub mod csv;
pub mod fetch;
pub mod plan;
pub mod stream;
pub mod zip_path;

pub use csv::{build_manifest, escape_csv_cell, sanitize_for_csv_formula};
pub use fetch::{HttpObjectFetcher, ObjectFetcher};
pub use plan::{ExportEntry, ExportPlan};
pub use stream::{BufferSink, ChannelSink, ExportSink, SinkClosed, StreamReport, MANIFEST_ENTRY, SKIPPED_ENTRY};
pub use zip_path::build_zip_path;
