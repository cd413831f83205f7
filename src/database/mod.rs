pub mod dynamic;
pub mod error;
pub mod executor;
pub mod manager;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod query_builder;
pub mod store;

pub use error::DataError;
pub use executor::{Selection, TableExecutor};
pub use manager::DatabaseManager;
pub use memory::MemoryStore;
pub use models::column::{ColumnInfo, ColumnSpec, ColumnType};
pub use postgres::PgStore;
pub use store::TableStore;
