use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Duration;

use mabu_api::mailer::SmtpSettings;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub require_email_verification: bool,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub smtp: SmtpSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = get("MABU_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("MABU_JWT_SECRET is unset or still a placeholder");
        }

        let access_minutes: i64 = parse(&var("MABU_ACCESS_TOKEN_MINUTES", "60"), "MABU_ACCESS_TOKEN_MINUTES")?;
        let refresh_days: i64 = parse(&var("MABU_REFRESH_TOKEN_DAYS", "30"), "MABU_REFRESH_TOKEN_DAYS")?;
        if access_minutes <= 0 || refresh_days <= 0 {
            bail!("Token lifetimes must be positive");
        }

        let require_email_verification = parse_bool(
            &var("MABU_REQUIRE_EMAIL_VERIFICATION", "true"),
            "MABU_REQUIRE_EMAIL_VERIFICATION",
        )?;

        let smtp = SmtpSettings {
            host: var("SMTP_HOST", ""),
            port: parse(&var("SMTP_PORT", "587"), "SMTP_PORT")?,
            username: get("SMTP_USERNAME").filter(|v| !v.is_empty()),
            password: get("SMTP_PASSWORD").filter(|v| !v.is_empty()),
            from: var("SMTP_FROM", "Mabu <noreply@mabu.local>"),
        };

        Ok(Self {
            jwt_secret,
            access_token_ttl: Duration::minutes(access_minutes),
            refresh_token_ttl: Duration::days(refresh_days),
            require_email_verification,
            db_path: var("MABU_DB_PATH", "mabu.db").into(),
            host: var("MABU_HOST", "0.0.0.0"),
            port: parse(&var("MABU_PORT", "3000"), "MABU_PORT")?,
            upload_dir: var("MABU_UPLOAD_DIR", "./uploads").into(),
            smtp,
        })
    }
}

fn parse<T>(raw: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has invalid value '{}'", key, raw))
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{} has invalid value '{}'", key, raw),
    }
}
