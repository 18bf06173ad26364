use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::tprintln;

use super::permissions::{PermissionMap, Role};
use super::principal::Identity;
use super::session::TokenService;

/// User row as the login flow and the auth middleware see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Per-user override map; JSON `null` or absent means role defaults apply.
    #[serde(default)]
    pub permissions: Option<PermissionMap>,
}

fn default_active() -> bool { true }

pub trait UserStore: Send + Sync {
    fn find_by_email(&self, email: &str) -> Option<UserRecord>;
    fn find_by_id(&self, id: i64) -> Option<UserRecord>;
}

/// Process-local user store keyed by id, with emails matched case-insensitively.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<i64, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self { Self::default() }

    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let store = Self::new();
        for r in records {
            store.upsert(r);
        }
        store
    }

    /// Load a JSON array of [`UserRecord`]s.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading users file {}", path.display()))?;
        let records: Vec<UserRecord> =
            serde_json::from_str(&text).with_context(|| format!("parsing users file {}", path.display()))?;
        info!(target: "startup", "loaded {} user(s) from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    pub fn upsert(&self, record: UserRecord) {
        self.users.write().insert(record.id, record);
    }

    pub fn len(&self) -> usize { self.users.read().len() }

    pub fn is_empty(&self) -> bool { self.users.read().is_empty() }
}

impl UserStore for InMemoryUserStore {
    fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        let needle = email.trim();
        self.users.read().values().find(|u| u.email.eq_ignore_ascii_case(needle)).cloned()
    }

    fn find_by_id(&self, id: i64) -> Option<UserRecord> { self.users.read().get(&id).cloned() }
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

/// Seed an admin account when the store has no users at all.
pub fn ensure_default_admin(store: &InMemoryUserStore, email: &str, password: &str) -> Result<()> {
    if !store.is_empty() {
        return Ok(());
    }
    let record = UserRecord {
        id: 1,
        email: email.to_string(),
        display_name: "Administrator".to_string(),
        role: Role::Admin.as_str().to_string(),
        password_hash: hash_password(password)?,
        active: true,
        permissions: None,
    };
    store.upsert(record);
    warn!(target: "startup", "no users configured; seeded default admin '{}'", email);
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub identity: Identity,
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse>;
}

pub struct LocalAuthProvider {
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<TokenService>,
}

impl LocalAuthProvider {
    pub fn new(users: Arc<dyn UserStore>, tokens: Arc<TokenService>) -> Self { Self { users, tokens } }
}

fn invalid_credentials() -> AppError { AppError::auth("invalid_credentials", "invalid email or password") }

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        if req.email.trim().is_empty() || req.password.is_empty() {
            return Err(AppError::user("missing_credentials", "email and password are required"));
        }
        let Some(user) = self.users.find_by_email(&req.email) else { return Err(invalid_credentials()); };
        if !user.active || !verify_password(&user.password_hash, &req.password) {
            return Err(invalid_credentials());
        }
        let token = self.tokens.issue(user.id, &user.email, &user.role, &user.display_name)?;
        let identity = Identity::new(user.id, user.email, user.role, user.display_name).with_overrides(user.permissions);
        tprintln!("auth.login subject={} role={}", identity.subject_id, identity.role);
        Ok(LoginResponse { token, token_type: "Bearer", expires_in: self.tokens.expiration_secs(), identity })
    }
}
