pub mod model;
pub mod service;
pub mod store;

pub use model::{department_closure, Department, UserProfile};
pub use service::DynamoUserDirectory;
pub use store::UserDirectory;
