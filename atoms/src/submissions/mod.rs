pub mod model;
pub mod service;
pub mod store;

pub use model::{Submission, SubmissionFile, SubmissionPatch, SubmissionStatus};
pub use service::DynamoSubmissionStore;
pub use store::SubmissionStore;
