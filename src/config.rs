//! Process configuration read from `CRM_*` environment variables at startup.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::identity::{RateLimitConfig, TokenConfig, MAX_EXPIRATION_SECS};

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub http_port: u16,
    pub token: TokenConfig,
    /// JSON permission table replacing the built-in CRM defaults.
    pub permissions_file: Option<PathBuf>,
    /// JSON array of user records; when absent a default admin is seeded.
    pub users_file: Option<PathBuf>,
    pub admin_email: String,
    pub admin_password: String,
    pub rate_limit: RateLimitConfig,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse::<T>().map_err(|e| anyhow!("invalid value '{}' for {}: {}", raw, key, e))
        }
        _ => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> { Self::from_lookup(|k| std::env::var(k).ok()) }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let secret = lookup("CRM_JWT_SECRET").unwrap_or_default();
        if secret.is_empty() {
            return Err(anyhow!("CRM_JWT_SECRET must be set to a non-empty value"));
        }
        let defaults = TokenConfig::default();
        let expiration_secs: i64 = parse_or(&lookup, "CRM_JWT_EXPIRATION", defaults.expiration_secs)?;
        if expiration_secs <= 0 || expiration_secs > MAX_EXPIRATION_SECS {
            return Err(anyhow!("CRM_JWT_EXPIRATION must be in 1..={}, got {}", MAX_EXPIRATION_SECS, expiration_secs));
        }
        let token = TokenConfig {
            secret,
            expiration_secs,
            algorithm: lookup("CRM_JWT_ALGORITHM").unwrap_or(defaults.algorithm),
            issuer: lookup("CRM_JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: lookup("CRM_JWT_AUDIENCE").unwrap_or(defaults.audience),
            leeway_secs: parse_or(&lookup, "CRM_JWT_LEEWAY", defaults.leeway_secs)?,
        };
        let rl = RateLimitConfig::default();
        let capacity: f64 = parse_or(&lookup, "CRM_RATE_LIMIT_CAPACITY", rl.capacity)?;
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(anyhow!("CRM_RATE_LIMIT_CAPACITY must be a finite number >= 1, got {}", capacity));
        }
        let refill_per_sec: f64 = parse_or(&lookup, "CRM_RATE_LIMIT_REFILL_PER_SEC", rl.refill_per_sec)?;
        if !refill_per_sec.is_finite() || refill_per_sec < 0.0 {
            return Err(anyhow!("CRM_RATE_LIMIT_REFILL_PER_SEC must be a finite number >= 0, got {}", refill_per_sec));
        }
        Ok(Self {
            http_port: parse_or(&lookup, "CRM_HTTP_PORT", 8080u16)?,
            token,
            permissions_file: lookup("CRM_PERMISSIONS_FILE").filter(|s| !s.is_empty()).map(PathBuf::from),
            users_file: lookup("CRM_USERS_FILE").filter(|s| !s.is_empty()).map(PathBuf::from),
            admin_email: lookup("CRM_ADMIN_EMAIL").unwrap_or_else(|| "admin@localhost".to_string()),
            admin_password: lookup("CRM_ADMIN_PASSWORD").unwrap_or_else(|| "admin".to_string()),
            rate_limit: RateLimitConfig { capacity, refill_per_sec },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let cfg = from(&[("CRM_JWT_SECRET", "k")]).unwrap();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.token.expiration_secs, 3600);
        assert_eq!(cfg.token.algorithm, "HS256");
        assert_eq!(cfg.token.leeway_secs, 60);
        assert_eq!(cfg.permissions_file, None);
        assert_eq!(cfg.rate_limit, RateLimitConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = from(&[
            ("CRM_JWT_SECRET", "k"),
            ("CRM_HTTP_PORT", "9001"),
            ("CRM_JWT_EXPIRATION", "600"),
            ("CRM_JWT_LEEWAY", "0"),
            ("CRM_JWT_ISSUER", "crm"),
            ("CRM_PERMISSIONS_FILE", "/etc/crm/perms.json"),
            ("CRM_RATE_LIMIT_CAPACITY", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.http_port, 9001);
        assert_eq!(cfg.token.expiration_secs, 600);
        assert_eq!(cfg.token.leeway_secs, 0);
        assert_eq!(cfg.token.issuer, "crm");
        assert_eq!(cfg.permissions_file, Some(PathBuf::from("/etc/crm/perms.json")));
        assert_eq!(cfg.rate_limit.capacity, 3.0);
    }

    #[test]
    fn rejects_missing_secret_and_bad_numbers() {
        assert!(from(&[]).is_err());
        assert!(from(&[("CRM_JWT_SECRET", "")]).is_err());
        assert!(from(&[("CRM_JWT_SECRET", "k"), ("CRM_HTTP_PORT", "http")]).is_err());
        assert!(from(&[("CRM_JWT_SECRET", "k"), ("CRM_JWT_EXPIRATION", "0")]).is_err());
        assert!(from(&[("CRM_JWT_SECRET", "k"), ("CRM_JWT_LEEWAY", "-5")]).is_err());
        assert!(from(&[("CRM_JWT_SECRET", "k"), ("CRM_JWT_EXPIRATION", i64::MAX.to_string().as_str())]).is_err());
        for bad in ["NaN", "inf", "0", "0.5", "-3"] {
            assert!(from(&[("CRM_JWT_SECRET", "k"), ("CRM_RATE_LIMIT_CAPACITY", bad)]).is_err(), "capacity {}", bad);
        }
        for bad in ["NaN", "inf", "-0.1"] {
            assert!(from(&[("CRM_JWT_SECRET", "k"), ("CRM_RATE_LIMIT_REFILL_PER_SEC", bad)]).is_err(), "refill {}", bad);
        }
        let ok = from(&[("CRM_JWT_SECRET", "k"), ("CRM_RATE_LIMIT_REFILL_PER_SEC", "0")]).unwrap();
        assert_eq!(ok.rate_limit.refill_per_sec, 0.0);
    }
}
