//! Business logic services layer

pub mod audit_service;
pub mod auth_service;
pub mod authz;
pub mod company_service;
pub mod device_service;
pub mod isolation;
pub mod permission_model;
pub mod token_service;
pub mod user_service;

pub use audit_service::{AuditSink, ChannelAuditSink, MemoryAuditSink, TracingAuditSink};
pub use auth_service::AuthService;
pub use authz::{AuthorizationEngine, Decision, DenyReason};
pub use company_service::CompanyService;
pub use device_service::DeviceService;
pub use isolation::{scope_query, DataQuery, ScopedQuery};
pub use token_service::TokenService;
pub use user_service::UserService;
