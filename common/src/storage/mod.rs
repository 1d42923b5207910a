pub mod db;
pub mod keys;
pub mod kv;
pub mod store;
pub mod types;
