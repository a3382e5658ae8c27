//! Persistence layer: libSQL-backed recipients, digest archive and run audit log.

pub mod libsql_backend;
pub mod migrations;

pub use libsql_backend::{ArchivedDigest, LibSqlBackend};
