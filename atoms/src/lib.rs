//! Persistence and storage atoms for the material-collection workflow.
//!
//! Every atom defines its domain model, a store trait, and the DynamoDB/S3
//! implementation of that trait. Atoms take clients as constructor args and
//! never read global state.

pub mod attrs;
pub mod dynamo;
pub mod error;
pub mod keys;
pub mod storage;
pub mod submissions;
pub mod tasks;
pub mod users;

pub use error::{StoreError, StoreResult};
