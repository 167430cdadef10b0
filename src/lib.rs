//! 委托授权系统库
//! 委托书生命周期引擎、短信同意协议与仅追加审计日志

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod sms;
pub mod telemetry;
