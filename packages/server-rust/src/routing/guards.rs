//! Built-in guards: bearer authentication and role checks.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_core::class::{ClassMeta, ClassRef};
use trellis_core::error::KernelError;
use trellis_core::token::Token;
use trellis_core::traits::{ExecutionContext, Guard, GuardRef, TokenVerifier};
use trellis_core::types::Principal;

/// Token under which the authentication guard looks up its verifier.
/// The registered value must be an `Arc<dyn TokenVerifier>`.
pub const TOKEN_VERIFIER: Token = Token::Name(Cow::Borrowed("TokenVerifier"));

/// The two guards that run ahead of every class and method guard, in order.
#[must_use]
pub fn builtin_guards() -> Vec<GuardRef> {
    vec![
        GuardRef::of::<AuthGuard>(AuthGuard::class()),
        GuardRef::of::<RolesGuard>(RolesGuard::class()),
    ]
}

// ---------------------------------------------------------------------------
// AuthGuard
// ---------------------------------------------------------------------------

/// Binds the principal from a bearer token.
///
/// Non-public handlers require a valid token. Public handlers pass without
/// one, but a valid token still binds the user.
pub struct AuthGuard {
    verifier: Arc<dyn TokenVerifier>,
}

impl AuthGuard {
    #[must_use]
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { verifier }
    }

    /// Class metadata: one dependency on [`TOKEN_VERIFIER`].
    #[must_use]
    pub fn class() -> ClassRef {
        ClassMeta::builder::<AuthGuard>("AuthGuard")
            .inject(TOKEN_VERIFIER)
            .construct(|deps| {
                let verifier = deps.get::<Arc<dyn TokenVerifier>>(0)?;
                Ok(AuthGuard::new(Arc::clone(&*verifier)))
            })
    }
}

#[async_trait]
impl Guard for AuthGuard {
    async fn can_activate(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), KernelError> {
        if ctx.request.user.is_some() {
            return Ok(());
        }
        let public = ctx.handler.public;
        let Some(token) = ctx.request.bearer_token().map(str::to_owned) else {
            return if public {
                Ok(())
            } else {
                Err(KernelError::unauthorized("Missing bearer token"))
            };
        };
        match self.verifier.verify(&token).await {
            Ok(principal) => {
                debug!(user = %principal.id, "request authenticated");
                ctx.request.user = Some(principal);
                Ok(())
            }
            Err(_) if public => Ok(()),
            Err(err) => Err(err),
        }
    }
}

// ---------------------------------------------------------------------------
// RolesGuard
// ---------------------------------------------------------------------------

/// Requires the user to hold at least one of the handler's effective roles.
pub struct RolesGuard;

impl RolesGuard {
    #[must_use]
    pub fn class() -> ClassRef {
        ClassMeta::unit::<RolesGuard>("RolesGuard", || RolesGuard)
    }
}

#[async_trait]
impl Guard for RolesGuard {
    async fn can_activate(&self, ctx: &mut ExecutionContext<'_>) -> Result<(), KernelError> {
        let roles = &ctx.handler.roles;
        if roles.is_empty() {
            return Ok(());
        }
        let Some(user) = &ctx.request.user else {
            return Err(KernelError::forbidden("Authentication required"));
        };
        if roles.iter().any(|role| user.has_role(role)) {
            Ok(())
        } else {
            Err(KernelError::forbidden(format!(
                "Requires one of roles: {}",
                roles.join(", ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// JwtVerifier
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
    exp: i64,
}

/// HS256 JWT verifier. Claims: `sub` (user id), `roles`, `exp`.
pub struct JwtVerifier {
    secret: Option<String>,
}

impl JwtVerifier {
    /// A verifier without a secret rejects every token.
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    /// Signs a token for `principal` valid for `ttl_secs`.
    ///
    /// # Errors
    ///
    /// Fails when no secret is configured or encoding fails.
    pub fn sign(&self, principal: &Principal, ttl_secs: i64) -> anyhow::Result<String> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no JWT secret configured"))?;
        let claims = Claims {
            sub: principal.id.clone(),
            roles: principal.roles.clone(),
            exp: Utc::now().timestamp() + ttl_secs,
        };
        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?)
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, KernelError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| KernelError::unauthorized("Token authentication is not configured"))?;
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|err| KernelError::unauthorized(format!("Invalid token: {err}")))?;
        Ok(Principal {
            id: data.claims.sub,
            roles: data.claims.roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use trellis_core::http::HttpRequest;
    use trellis_core::traits::{HandlerInfo, HandlerKind};

    use super::*;

    fn info(public: bool, roles: &[&str]) -> HandlerInfo {
        HandlerInfo {
            class_name: "UsersController".into(),
            method_name: "find".into(),
            kind: HandlerKind::Rest,
            roles: roles.iter().map(ToString::to_string).collect(),
            public,
        }
    }

    fn verifier() -> Arc<JwtVerifier> {
        Arc::new(JwtVerifier::new(Some("s3cret".into())))
    }

    async fn run(guard: &dyn Guard, req: &mut HttpRequest, handler: &HandlerInfo) -> Result<(), KernelError> {
        let mut ctx = ExecutionContext {
            request: req,
            response: None,
            handler,
        };
        guard.can_activate(&mut ctx).await
    }

    #[tokio::test]
    async fn valid_token_binds_user() {
        let jwt = verifier();
        let token = jwt.sign(&Principal::new("u1", ["admin"]), 60).unwrap();
        let guard = AuthGuard::new(jwt);
        let mut req = HttpRequest::new(Method::GET, "/").with_header("authorization", &format!("Bearer {token}"));

        run(&guard, &mut req, &info(false, &[])).await.unwrap();
        assert_eq!(req.user, Some(Principal::new("u1", ["admin"])));
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized_unless_public() {
        let guard = AuthGuard::new(verifier());
        let mut req = HttpRequest::new(Method::GET, "/");
        let err = run(&guard, &mut req, &info(false, &[])).await.unwrap_err();
        assert!(matches!(err, KernelError::Unauthorized(_)));

        run(&guard, &mut req, &info(true, &[])).await.unwrap();
        assert!(req.user.is_none());
    }

    #[tokio::test]
    async fn bad_token_on_public_route_is_ignored() {
        let guard = AuthGuard::new(verifier());
        let mut req = HttpRequest::new(Method::GET, "/").with_header("authorization", "Bearer garbage");
        assert!(run(&guard, &mut req, &info(false, &[])).await.is_err());
        run(&guard, &mut req, &info(true, &[])).await.unwrap();
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let jwt = verifier();
        let token = jwt.sign(&Principal::new("u1", Vec::<String>::new()), -3600).unwrap();
        let guard = AuthGuard::new(jwt);
        let mut req = HttpRequest::new(Method::GET, "/").with_header("authorization", &format!("Bearer {token}"));
        assert!(run(&guard, &mut req, &info(false, &[])).await.is_err());
    }

    #[tokio::test]
    async fn verifier_without_secret_rejects() {
        let jwt = JwtVerifier::new(None);
        assert!(jwt.sign(&Principal::new("u", ["r"]), 60).is_err());
        assert!(jwt.verify("x.y.z").await.is_err());
    }

    #[tokio::test]
    async fn roles_guard_requires_any_role() {
        let mut req = HttpRequest::new(Method::GET, "/");
        run(&RolesGuard, &mut req, &info(false, &[])).await.unwrap();

        let err = run(&RolesGuard, &mut req, &info(false, &["admin"])).await.unwrap_err();
        assert!(matches!(err, KernelError::Forbidden(_)));

        req.user = Some(Principal::new("u", ["editor"]));
        assert!(run(&RolesGuard, &mut req, &info(false, &["admin"])).await.is_err());
        run(&RolesGuard, &mut req, &info(false, &["admin", "editor"])).await.unwrap();
    }

    #[test]
    fn builtin_order_is_auth_then_roles() {
        let guards = builtin_guards();
        assert_eq!(guards[0].class().name(), "AuthGuard");
        assert_eq!(guards[1].class().name(), "RolesGuard");
    }
}
