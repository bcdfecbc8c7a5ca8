use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::models::Id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id, stringified.
    pub sub: String,
    pub exp: usize,
    pub roles: Vec<Role>,
}

fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            match decode_jwt(bearer.token()) {
                Ok(claims) => return ready(Ok(Auth(claims))),
                Err(_) => return ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            }
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}

/// Request-scoped identity: the parsed subject plus role set. This is the
/// explicit replacement for ambient session state — handlers receive it as an
/// extractor and pass it down.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Id,
    pub roles: Vec<Role>,
}

impl Identity {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Moderator or admin.
    pub fn is_elevated(&self) -> bool {
        self.roles.iter().any(|r| matches!(r, Role::Moderator | Role::Admin))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// CSRF tokens are derived from this.
    pub fn subject(&self) -> String {
        self.user_id.to_string()
    }
}

impl FromRequest for Identity {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        match Auth::from_request(req, pl).into_inner() {
            Ok(Auth(claims)) => match claims.sub.parse::<Id>() {
                Ok(user_id) if user_id > 0 => {
                    ready(Ok(Identity { user_id, roles: claims.roles }))
                }
                _ => ready(Err(actix_web::error::ErrorUnauthorized(
                    "Invalid token subject",
                ))),
            },
            Err(e) => ready(Err(e)),
        }
    }
}

/// Create a JWT for a user. Tests lean on this to mint tokens directly.
pub fn create_jwt(user_id: Id, roles: Vec<Role>) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration,
        roles,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_claims() {
        std::env::set_var("JWT_SECRET", "unit-test-secret-0123456789abcdef!!");
        let token = create_jwt(42, vec![Role::User, Role::Moderator]).unwrap();
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.roles, vec![Role::User, Role::Moderator]);
    }

    #[test]
    fn elevated_roles() {
        let user = Identity { user_id: 1, roles: vec![Role::User] };
        let moderator = Identity { user_id: 2, roles: vec![Role::User, Role::Moderator] };
        let admin = Identity { user_id: 3, roles: vec![Role::Admin] };
        assert!(!user.is_elevated());
        assert!(moderator.is_elevated());
        assert!(admin.is_elevated());
        assert!(!moderator.is_admin());
        assert!(admin.is_admin());
    }
}
