//! `hubq token` – mint a bearer token locally from the configured secret.

use anyhow::{Context, Result};
use hubq_core::auth::JwtAuthorizer;
use hubq_core::config::HubqConfig;
use std::time::Duration;

pub fn run_token(cfg: &HubqConfig, subject: &str, ttl_secs: Option<u64>) -> Result<()> {
    let secret = cfg
        .jwt_secret
        .as_deref()
        .context("no token secret configured (set JWT_SECRET or jwt_secret in config.toml)")?;
    let token = JwtAuthorizer::new(secret).issue(subject, ttl_secs.map(Duration::from_secs))?;
    println!("{token}");
    Ok(())
}
