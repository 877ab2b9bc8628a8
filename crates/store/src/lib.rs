pub mod db;
pub mod query;
pub mod retention;
pub mod schema;
pub mod write;

pub use db::{SpanStore, StoreStatus};
