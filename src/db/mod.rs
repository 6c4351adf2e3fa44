pub mod client;
pub mod models;

pub use client::Database;
pub use models::{AuditAction, DbAuditEntry, DbCatalogEntry, DbPackage, PackageKind};
