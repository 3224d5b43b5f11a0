//! Persistence layer: store traits plus Postgres and in-memory implementations

pub mod memory_store;
pub mod pg_store;
pub mod store;

pub use memory_store::MemoryStore;
pub use pg_store::PgStore;
pub use store::{
    AuditStore, CompanyFilter, CompanyScope, CompanyStore, CredentialStore, DeviceFilter,
    RoleBindingFilter, RotationOutcome, Store, StoreError, UserFilter, UserStore,
};
