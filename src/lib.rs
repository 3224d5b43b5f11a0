//! 数字标牌平台的多租户认证与授权核心
//! 凭证、令牌、权限模型、授权引擎与公司数据隔离

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
