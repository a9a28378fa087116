//! Password hashing, bearer tokens and the request extractors that resolve the
//! calling user.

use std::sync::Arc;

use argon2::{
  password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
  Argon2,
};
use axum::{
  async_trait,
  extract::FromRequestParts,
  http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{User, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
  let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())?;
  Ok(Argon2::default().hash_password(password.as_bytes(), &salt)?.to_string())
}

/// False for malformed hashes as well as mismatches.
pub fn verify_password(password: &str, hash: &str) -> bool {
  match PasswordHash::new(hash) {
    Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
    Err(e) => {
      warn!(target: "auth", error = %e, "Stored password hash is not a valid PHC string");
      false
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub role: String,
  pub iat: i64,
  pub exp: i64,
}

/// HS256 signing material plus token lifetime.
pub struct JwtKeys {
  encoding: EncodingKey,
  decoding: DecodingKey,
  ttl: Duration,
}

impl JwtKeys {
  pub fn new(secret: &str, ttl_minutes: i64) -> Self {
    Self {
      encoding: EncodingKey::from_secret(secret.as_bytes()),
      decoding: DecodingKey::from_secret(secret.as_bytes()),
      ttl: Duration::minutes(ttl_minutes),
    }
  }

  pub fn issue(&self, user_id: &str, role: UserRole) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let claims = Claims {
      sub: user_id.to_string(),
      role: role.as_str().to_string(),
      iat: now.timestamp(),
      exp: (now + self.ttl).timestamp(),
    };
    jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
  }

  pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
    Ok(data.claims)
  }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
  let (scheme, token) = value.split_once(' ')?;
  if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
    Some(token.trim())
  } else {
    None
  }
}

/// Resolve the active user behind a token, or None.
fn resolve_user(state: &AppState, token: &str) -> ApiResult<Option<User>> {
  let claims = match state.jwt.verify(token) {
    Ok(c) => c,
    Err(e) => {
      debug!(target: "auth", error = %e, "Rejected bearer token");
      return Ok(None);
    }
  };
  Ok(state.db.get_user(&claims.sub)?.filter(|u| u.is_active))
}

/// Authenticated caller. Rejects with 401 when the token is missing or invalid.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let token = bearer_token(&parts.headers)
      .ok_or_else(|| ApiError::Unauthorized("Not authenticated".into()))?;
    resolve_user(state, token)?
      .map(AuthUser)
      .ok_or_else(|| ApiError::Unauthorized("Could not validate credentials".into()))
  }
}

/// Caller if a valid token was presented; never rejects on bad credentials.
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    match bearer_token(&parts.headers) {
      Some(token) => Ok(MaybeUser(resolve_user(state, token)?)),
      None => Ok(MaybeUser(None)),
    }
  }
}

pub fn require_admin(user: &User) -> ApiResult<()> {
  if user.role == UserRole::Admin {
    Ok(())
  } else {
    Err(ApiError::Forbidden("Admin access required".into()))
  }
}
