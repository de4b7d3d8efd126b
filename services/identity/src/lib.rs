//! Identity, session and authorization core
//!
//! One-time passcodes, a dual-sided token ledger, device/session tracking
//! with a single-session policy, and role × section × permission checks,
//! composed into signup, login, password reset, refresh and logout flows.
//!
//! ```no_run
//! use std::sync::Arc;
//! use identity::{
//!     config::OtpMode,
//!     flows::{FlowConfig, IdentityFlows},
//!     jwt::{JwtConfig, JwtService},
//!     notifier::LogNotifier,
//!     repositories::MemoryStore,
//! };
//!
//! # fn main() -> anyhow::Result<()> {
//! let jwt = JwtService::new(JwtConfig::from_env()?)?;
//! let flows = IdentityFlows::new(
//!     MemoryStore::new(),
//!     jwt,
//!     Arc::new(LogNotifier),
//!     FlowConfig {
//!         otp_mode: OtpMode::Fixed(123_456),
//!         otp_ttl_secs: 300,
//!         multi_device_login: false,
//!         default_role: "user".into(),
//!         link_base_url: "http://localhost:3000".into(),
//!     },
//! );
//! # let _ = flows;
//! # Ok(())
//! # }
//! ```

pub mod authz;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod flows;
pub mod jwt;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod otp;
pub mod password;
pub mod rate_limiter;
pub mod repositories;
pub mod roles;
pub mod routes;
pub mod session;
pub mod validation;
