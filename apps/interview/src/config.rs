use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{FixedOffset, Local, Offset};

use crate::session::{SessionSettings, DEFAULT_BUDGET_SECONDS, DEFAULT_COMPLETION_DELAY};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the interview backend, e.g. `https://host/api`.
    pub api_url: String,
    pub api_token: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub budget_seconds: i64,
    pub completion_delay: Duration,
    /// Zone for backend timestamps that carry no offset.
    pub backend_zone: FixedOffset,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let budget_seconds = optional_env("INTERVIEW_BUDGET_SECONDS")
            .map(|v| {
                v.parse::<i64>()
                    .context("INTERVIEW_BUDGET_SECONDS must be a whole number of seconds")
            })
            .transpose()?
            .unwrap_or(DEFAULT_BUDGET_SECONDS);
        anyhow::ensure!(budget_seconds > 0, "INTERVIEW_BUDGET_SECONDS must be positive");

        let completion_delay = optional_env("COMPLETION_DISPLAY_DELAY_MS")
            .map(|v| {
                v.parse::<u64>()
                    .map(Duration::from_millis)
                    .context("COMPLETION_DISPLAY_DELAY_MS must be a number of milliseconds")
            })
            .transpose()?
            .unwrap_or(DEFAULT_COMPLETION_DELAY);

        let backend_zone = match optional_env("BACKEND_UTC_OFFSET_MINUTES") {
            Some(v) => parse_offset_minutes(&v)?,
            None => Local::now().offset().fix(),
        };

        Ok(Config {
            api_url: require_env("INTERVIEW_API_URL")?,
            api_token: optional_env("INTERVIEW_API_TOKEN"),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8090".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            budget_seconds,
            completion_delay,
            backend_zone,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            budget_seconds: self.budget_seconds,
            completion_delay: self.completion_delay,
            backend_zone: self.backend_zone,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_offset_minutes(raw: &str) -> Result<FixedOffset> {
    let minutes = raw
        .trim()
        .parse::<i32>()
        .context("BACKEND_UTC_OFFSET_MINUTES must be a whole number of minutes")?;
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .with_context(|| format!("BACKEND_UTC_OFFSET_MINUTES out of range: {minutes}"))
}
