//! Authentication and authorization core: signed session tokens, the role/ownership
//! permission evaluator, user records for login, and the per-request context.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod request_context;
mod authorizer;
pub mod permissions;
pub mod rate_limit;

pub use principal::Identity;
pub use session::{SessionToken, MAX_EXPIRATION_SECS, TokenConfig, TokenService, TokenState};
pub use provider::{
    ensure_default_admin, hash_password, verify_password, AuthProvider, InMemoryUserStore, LocalAuthProvider,
    LoginRequest, LoginResponse, UserRecord, UserStore,
};
pub use request_context::{authenticate, bearer_token, RequestContext};
pub use authorizer::AccessControl;
pub use permissions::{ActionMap, PermissionMap, PermissionTable, PermissionValue, Role};
pub use rate_limit::{RateLimitConfig, RateLimiter, RateScope};
