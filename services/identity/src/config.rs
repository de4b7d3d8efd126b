//! Service settings
//!
//! Loaded once at startup from `IDENTITY__*` environment variables and
//! threaded into the components that need them.

use std::str::FromStr;

use anyhow::Result;
use config::{Config, Environment};
use serde::Deserialize;

/// How OTP codes are produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpMode {
    /// Uniformly random 6-digit codes
    Random,
    /// Always the same code; for development and tests
    Fixed(u32),
}

/// Which store backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgres" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("unknown storage backend: {}", other),
        }
    }
}

/// Raw settings as read from the environment
#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySettings {
    pub otp_mode: String,
    pub otp_fixed_code: u32,
    pub otp_ttl_secs: i64,
    pub multi_device_login: bool,
    pub default_role: String,
    pub cleanup_schedule: String,
    pub bind_addr: String,
    pub link_base_url: String,
    pub notifier_webhook_url: Option<String>,
    pub storage: String,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_window_secs: u64,
    pub rate_limit_ban_secs: u64,
}

impl IdentitySettings {
    /// Load settings from `IDENTITY__*` variables over built-in defaults
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .set_default("otp_mode", "random")?
            .set_default("otp_fixed_code", 123_456)?
            .set_default("otp_ttl_secs", 300)?
            .set_default("multi_device_login", false)?
            .set_default("default_role", "user")?
            .set_default("cleanup_schedule", "0 0 3 * * *")?
            .set_default("bind_addr", "0.0.0.0:3000")?
            .set_default("link_base_url", "http://localhost:3000")?
            .set_default("storage", "postgres")?
            .set_default("rate_limit_max_attempts", 5)?
            .set_default("rate_limit_window_secs", 300)?
            .set_default("rate_limit_ban_secs", 3600)?
            .add_source(
                Environment::with_prefix("IDENTITY")
                    .prefix_separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: IdentitySettings = settings.try_deserialize()?;
        settings.otp()?;
        settings.storage()?;
        Ok(settings)
    }

    /// Parsed OTP mode
    pub fn otp(&self) -> Result<OtpMode> {
        match self.otp_mode.as_str() {
            "random" => Ok(OtpMode::Random),
            "fixed" => {
                crate::validation::validate_otp(self.otp_fixed_code)
                    .map_err(|e| anyhow::anyhow!("IDENTITY__OTP_FIXED_CODE: {}", e))?;
                Ok(OtpMode::Fixed(self.otp_fixed_code))
            }
            other => anyhow::bail!("unknown otp mode: {}", other),
        }
    }

    pub fn storage(&self) -> Result<StorageBackend> {
        self.storage.parse()
    }
}
