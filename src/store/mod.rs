//! Store module
//!
//! Owns the SQLite connection pool and the schema the other components rely on.

pub mod db;

pub use db::Store;
