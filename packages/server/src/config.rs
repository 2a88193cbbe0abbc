use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::common::MemberId;
use crate::domains::agents::FlowSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// JetStream broker when set, in-memory broker otherwise
    pub nats_url: Option<String>,
    /// Postgres store when set, in-memory store otherwise
    pub database_url: Option<String>,
    pub human_member_id: MemberId,
    pub reply_delay: Duration,
    pub auto_pause_enabled: bool,
    pub auto_pause_threshold: u32,
    pub pending_capacity: usize,
    pub broker_max_deliver: i64,
    pub agents_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            port: parse_or("PORT", 8080).context("PORT must be a valid number")?,
            nats_url: optional("NATS_URL"),
            database_url: optional("DATABASE_URL"),
            human_member_id: MemberId::new(
                env::var("HUMAN_MEMBER_ID").unwrap_or_else(|_| "user".to_string()),
            ),
            reply_delay: Duration::from_millis(
                parse_or("REPLY_DELAY_MS", 0u64).context("REPLY_DELAY_MS must be a valid number")?,
            ),
            auto_pause_enabled: parse_or("AUTO_PAUSE_ENABLED", false)
                .context("AUTO_PAUSE_ENABLED must be true or false")?,
            auto_pause_threshold: parse_or("AUTO_PAUSE_THRESHOLD", 10u32)
                .context("AUTO_PAUSE_THRESHOLD must be a valid number")?,
            pending_capacity: parse_or("PENDING_CAPACITY", 1024usize)
                .context("PENDING_CAPACITY must be a valid number")?,
            broker_max_deliver: parse_or("BROKER_MAX_DELIVER", 5i64)
                .context("BROKER_MAX_DELIVER must be a valid number")?,
            agents_file: optional("AGENTS_FILE").map(PathBuf::from),
        })
    }

    /// Initial flow-control settings.
    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            auto_pause_enabled: self.auto_pause_enabled,
            auto_pause_threshold: self.auto_pause_threshold,
            reply_delay: self.reply_delay,
            pending_capacity: self.pending_capacity,
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => Ok(raw.trim().parse()?),
        None => Ok(default),
    }
}
