pub mod model;
pub mod service;
pub mod store;

pub use model::{
    insert_write_count, CollectionItem, CollectionTask, ItemTemplate, ScopeType, SourceBinding,
    TaskEdit, TaskScope, TaskStatus, SOURCE_TYPE_NOTICE,
};
pub use service::DynamoTaskStore;
pub use store::TaskStore;
