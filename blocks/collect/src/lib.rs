//! Material-collection workflow: task lifecycle, student submissions,
//! staff review and ZIP export.

pub mod audit;
pub mod authz;
pub mod context;
pub mod error;
pub mod export;
pub mod http;
pub mod lifecycle;
pub mod predicates;
pub mod review;
pub mod types;
pub mod workflow;

pub use collect_shared::CollectLimits;
pub use context::{CollectDeps, CollectService};
pub use error::{CollectError, CollectResult, ErrorKind};
pub use export::{BufferSink, ChannelSink, ExportPlan, ExportSink, ObjectFetcher, StreamReport};
