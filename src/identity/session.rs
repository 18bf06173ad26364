use std::str::FromStr;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TokenError;
use crate::tprintln;

use super::principal::Identity;

pub type SessionToken = String;

/// Upper bound on token lifetime (one year).
pub const MAX_EXPIRATION_SECS: i64 = 366 * 24 * 60 * 60;

/// Construction parameters for [`TokenService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub secret: String,
    pub expiration_secs: i64,
    /// JWT algorithm name; only HMAC variants (HS256/HS384/HS512) are accepted.
    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
    /// Clock-skew tolerance applied to `exp`. Zero means exact expiry.
    pub leeway_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_secs: 60 * 60,
            algorithm: "HS256".to_string(),
            issuer: "crmguard".to_string(),
            audience: "crmguard".to_string(),
            leeway_secs: 60,
        }
    }
}

/// Identity fields carried inside the signed envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct ClaimsData {
    id: i64,
    email: String,
    role: String,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Claims {
    iss: String,
    aud: String,
    iat: i64,
    exp: i64,
    data: ClaimsData,
}

/// Diagnostic classification of a token. Authorization decisions use [`TokenService::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Fresh,
    Expired,
    Invalid,
}

/// Issues and validates signed session tokens. Holds only immutable configuration.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    header: Header,
    validation: Validation,
    expiration_secs: i64,
    leeway_secs: u64,
    issuer: String,
    audience: String,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.header.alg)
            .field("expiration_secs", &self.expiration_secs)
            .field("leeway_secs", &self.leeway_secs)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(cfg: &TokenConfig) -> Result<Self, TokenError> {
        if cfg.secret.is_empty() {
            return Err(TokenError::Signing("signing secret is empty".into()));
        }
        if cfg.expiration_secs <= 0 || cfg.expiration_secs > MAX_EXPIRATION_SECS {
            return Err(TokenError::Signing(format!(
                "expiration must be in 1..={} seconds, got {}",
                MAX_EXPIRATION_SECS, cfg.expiration_secs
            )));
        }
        let alg = Algorithm::from_str(cfg.algorithm.trim())
            .map_err(|_| TokenError::Signing(format!("unknown algorithm '{}'", cfg.algorithm)))?;
        if !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(TokenError::Signing(format!("algorithm {:?} is not a symmetric MAC", alg)));
        }

        let mut validation = Validation::new(alg);
        validation.leeway = cfg.leeway_secs;
        validation.set_issuer(&[cfg.issuer.as_str()]);
        validation.set_audience(&[cfg.audience.as_str()]);

        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            header: Header::new(alg),
            validation,
            expiration_secs: cfg.expiration_secs,
            leeway_secs: cfg.leeway_secs,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        })
    }

    pub fn expiration_secs(&self) -> i64 { self.expiration_secs }

    pub fn issue(&self, subject_id: i64, email: &str, role: &str, display_name: &str) -> Result<SessionToken, TokenError> {
        self.issue_at(subject_id, email, role, display_name, chrono::Utc::now().timestamp())
    }

    /// Same as [`issue`](Self::issue) with an explicit `iat` (unix seconds).
    pub fn issue_at(
        &self,
        subject_id: i64,
        email: &str,
        role: &str,
        display_name: &str,
        issued_at: i64,
    ) -> Result<SessionToken, TokenError> {
        let exp = issued_at
            .checked_add(self.expiration_secs)
            .ok_or_else(|| TokenError::Signing(format!("expiry overflows for iat {}", issued_at)))?;
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: issued_at,
            exp,
            data: ClaimsData {
                id: subject_id,
                email: email.to_string(),
                role: role.to_string(),
                name: display_name.to_string(),
            },
        };
        let token = encode(&self.header, &claims, &self.encoding).map_err(|e| TokenError::Signing(e.to_string()))?;
        tprintln!("token.issue subject={} role={} exp={}", subject_id, role, claims.exp);
        Ok(token)
    }

    /// Verify signature, issuer, audience and expiry. All failures collapse to [`TokenError::Invalid`].
    pub fn validate(&self, token: &str) -> Result<Identity, TokenError> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => {
                let d = data.claims.data;
                Ok(Identity::new(d.id, d.email, d.role, d.name))
            }
            Err(e) => {
                debug!(target: "auth", reason = ?e.kind(), "token rejected");
                Err(TokenError::Invalid)
            }
        }
    }

    /// Classify a token without the expiry check; used to explain rejections in debug logs.
    pub fn inspect(&self, token: &str) -> TokenState {
        let mut relaxed = self.validation.clone();
        relaxed.validate_exp = false;
        match decode::<Claims>(token, &self.decoding, &relaxed) {
            Ok(data) => {
                let now = chrono::Utc::now().timestamp();
                if data.claims.exp.saturating_add(self.leeway_secs as i64) < now {
                    TokenState::Expired
                } else {
                    TokenState::Fresh
                }
            }
            Err(_) => TokenState::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(secret: &str, leeway: u64) -> TokenConfig {
        TokenConfig { secret: secret.into(), leeway_secs: leeway, ..TokenConfig::default() }
    }

    fn svc() -> TokenService { TokenService::new(&cfg("s3cret", 0)).unwrap() }

    #[test]
    fn issue_then_validate_returns_identity() {
        let s = svc();
        let tok = s.issue(7, "ana@crm.test", "gerente", "Ana").unwrap();
        let id = s.validate(&tok).unwrap();
        assert_eq!(id, Identity::new(7, "ana@crm.test", "gerente", "Ana"));
        assert_eq!(s.inspect(&tok), TokenState::Fresh);
    }

    #[test]
    fn issuance_does_not_validate_role() {
        let s = svc();
        let tok = s.issue(1, "x@crm.test", "not-a-role", "X").unwrap();
        assert_eq!(s.validate(&tok).unwrap().role, "not-a-role");
    }

    #[test]
    fn claims_keep_nested_data_envelope() {
        let s = svc();
        let tok = s.issue_at(3, "a@b.com", "suporte", "A", 1_700_000_000).unwrap();
        let mut v = Validation::new(Algorithm::HS256);
        v.validate_exp = false;
        v.set_audience(&["crmguard"]);
        let raw = decode::<serde_json::Value>(&tok, &DecodingKey::from_secret(b"s3cret"), &v).unwrap().claims;
        assert_eq!(raw["iss"], "crmguard");
        assert_eq!(raw["iat"], 1_700_000_000);
        assert_eq!(raw["exp"], 1_700_000_000 + 3600);
        assert_eq!(raw["data"]["id"], 3);
        assert_eq!(raw["data"]["role"], "suporte");
        assert_eq!(raw["data"]["name"], "A");
    }

    #[test]
    fn expired_token_is_invalid() {
        let s = svc();
        let now = chrono::Utc::now().timestamp();
        let tok = s.issue_at(1, "a@b.com", "admin", "A", now - 7200).unwrap();
        assert_eq!(s.validate(&tok), Err(TokenError::Invalid));
        assert_eq!(s.inspect(&tok), TokenState::Expired);
    }

    #[test]
    fn leeway_tolerates_recent_expiry() {
        let lenient = TokenService::new(&cfg("s3cret", 60)).unwrap();
        let strict = svc();
        let now = chrono::Utc::now().timestamp();
        // expired 10 seconds ago
        let tok = strict.issue_at(1, "a@b.com", "admin", "A", now - 3610).unwrap();
        assert!(lenient.validate(&tok).is_ok());
        assert_eq!(strict.validate(&tok), Err(TokenError::Invalid));
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let tok = svc().issue(1, "a@b.com", "admin", "A").unwrap();
        let other = TokenService::new(&cfg("other", 0)).unwrap();
        assert_eq!(other.validate(&tok), Err(TokenError::Invalid));
        assert_eq!(other.inspect(&tok), TokenState::Invalid);
    }

    #[test]
    fn wrong_issuer_or_audience_is_invalid() {
        let tok = svc().issue(1, "a@b.com", "admin", "A").unwrap();
        let other_iss = TokenService::new(&TokenConfig { issuer: "elsewhere".into(), ..cfg("s3cret", 0) }).unwrap();
        let other_aud = TokenService::new(&TokenConfig { audience: "mobile".into(), ..cfg("s3cret", 0) }).unwrap();
        assert!(other_iss.validate(&tok).is_err());
        assert!(other_aud.validate(&tok).is_err());
    }

    #[test]
    fn malformed_tokens_are_invalid() {
        let s = svc();
        for bad in ["", "a.b.c.d", "a.b.c", "not-a-token", "..", "\u{0}"] {
            assert_eq!(s.validate(bad), Err(TokenError::Invalid), "{:?}", bad);
        }
        let tok = s.issue(1, "a@b.com", "admin", "A").unwrap();
        let tampered = format!("{}x", tok);
        assert_eq!(s.validate(&tampered), Err(TokenError::Invalid));
    }

    #[test]
    fn construction_rejects_misconfiguration() {
        assert!(matches!(TokenService::new(&cfg("", 0)), Err(TokenError::Signing(_))));
        assert!(matches!(
            TokenService::new(&TokenConfig { expiration_secs: 0, ..cfg("k", 0) }),
            Err(TokenError::Signing(_))
        ));
        assert!(matches!(
            TokenService::new(&TokenConfig { algorithm: "RS256".into(), ..cfg("k", 0) }),
            Err(TokenError::Signing(_))
        ));
        assert!(matches!(
            TokenService::new(&TokenConfig { algorithm: "HS999".into(), ..cfg("k", 0) }),
            Err(TokenError::Signing(_))
        ));
        assert!(TokenService::new(&TokenConfig { algorithm: "HS512".into(), ..cfg("k", 0) }).is_ok());
    }

    #[test]
    fn expiration_is_bounded() {
        for secs in [MAX_EXPIRATION_SECS + 1, i64::MAX] {
            assert!(matches!(
                TokenService::new(&TokenConfig { expiration_secs: secs, ..cfg("k", 0) }),
                Err(TokenError::Signing(_))
            ));
        }
        let s = TokenService::new(&TokenConfig { expiration_secs: MAX_EXPIRATION_SECS, ..cfg("k", 0) }).unwrap();
        let tok = s.issue(1, "a@b.com", "admin", "A").unwrap();
        assert!(s.validate(&tok).is_ok());
    }

    #[test]
    fn issue_at_near_clock_limit_errors_instead_of_overflowing() {
        let s = svc();
        let err = s.issue_at(1, "a@b.com", "admin", "A", i64::MAX - 10).unwrap_err();
        assert!(matches!(err, TokenError::Signing(_)));
    }
}
