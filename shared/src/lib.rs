pub mod audit;
pub mod config;
pub mod logging;
pub mod notices;
pub mod permissions;
pub mod state;
pub mod visibility;

pub use audit::{AuditEvent, AuditSink, DynamoAuditSink};
pub use config::{AppConfig, CollectLimits};
pub use notices::{DynamoNoticeDirectory, Notice, NoticeDirectory};
pub use permissions::{DynamoPermissionOracle, PermissionOracle};
pub use state::AppState;
pub use visibility::{DynamoVisibilityResolver, VisibilityResolver};
