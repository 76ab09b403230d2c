pub mod db_pool;
pub mod executor;
pub mod history;
pub mod schema_catalog;
