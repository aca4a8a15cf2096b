//! # Authenticator
//!
//! Validates bearer tokens with the `jsonwebtoken` crate and turns their
//! claims into a [`Principal`]. Three distinct failure modes, all mapping to
//! 401: a missing token, a structurally or cryptographically invalid token,
//! and an expired token.
//!
//! One proxied path is exempt from authentication entirely (the control-plane
//! bootstrap endpoint, which must be reachable before any principal can be
//! established); everything else that reaches the pipeline requires a valid
//! principal.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::collections::HashSet;

use crate::auth::principal::Principal;
use crate::core::config::AuthSettings;
use crate::core::error::{GatewayError, GatewayResult};

const BEARER_PREFIX: &str = "Bearer ";
const USERNAME_CLAIM: &str = "preferred_username";
const SUBJECT_CLAIM: &str = "sub";
const FALLBACK_ROLES_CLAIM: &str = "authorities";

/// Validates tokens and extracts principals
pub struct Authenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    roles_claim: String,
    exempt_paths: Vec<String>,
}

impl Authenticator {
    /// Build an authenticator from the auth settings
    ///
    /// HS256 with a shared secret or RS256 with a PEM public key; the secret
    /// takes precedence when both are configured.
    pub fn new(settings: &AuthSettings) -> GatewayResult<Self> {
        let (decoding_key, algorithm) = if let Some(secret) = &settings.hs256_secret {
            (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256)
        } else if let Some(pem) = &settings.rs256_public_key_pem {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| GatewayError::config(format!("Invalid RS256 public key: {}", e)))?;
            (key, Algorithm::RS256)
        } else {
            return Err(GatewayError::config(
                "No token validation key material configured",
            ));
        };

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        // Identity providers vary in which audiences they stamp; route and
        // field policies are the gateway's authorization mechanism.
        validation.validate_aud = false;

        Ok(Self {
            decoding_key,
            validation,
            roles_claim: settings.roles_claim.clone(),
            exempt_paths: settings.exempt_paths.clone(),
        })
    }

    /// Whether the given proxied path skips authentication (exact match)
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| exempt == path)
    }

    /// Validate the `Authorization` header value and produce a principal
    pub fn authenticate(&self, header_value: Option<&str>) -> GatewayResult<Principal> {
        let token = match header_value {
            Some(value) => value
                .strip_prefix(BEARER_PREFIX)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(GatewayError::MissingToken)?,
            None => return Err(GatewayError::MissingToken),
        };

        let data = decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => GatewayError::ExpiredToken,
                _ => GatewayError::invalid_token(e.to_string()),
            })?;

        let claims = data.claims;
        let username = extract_username(&claims)?;
        let roles = extract_roles(&claims, &self.roles_claim);

        Ok(Principal::new(username, roles, claims))
    }
}

/// Username from `preferred_username`, falling back to `sub`
fn extract_username(claims: &serde_json::Value) -> GatewayResult<String> {
    for claim in [USERNAME_CLAIM, SUBJECT_CLAIM] {
        if let Some(value) = claims.get(claim).and_then(|v| v.as_str()) {
            if !value.is_empty() {
                return Ok(value.to_string());
            }
        }
    }
    Err(GatewayError::invalid_token(format!(
        "token carries neither '{}' nor '{}' claim",
        USERNAME_CLAIM, SUBJECT_CLAIM
    )))
}

/// Roles from the configured claim path, falling back to `authorities`
///
/// The claim path is dot-separated to support nested shapes such as
/// `realm_access.roles`. The claim value may be an array of strings or a
/// comma-separated string. A token with no roles claim yields an empty set,
/// which is valid: default-allow routes remain reachable.
fn extract_roles(claims: &serde_json::Value, roles_claim: &str) -> HashSet<String> {
    let roles = roles_at_path(claims, roles_claim);
    if !roles.is_empty() {
        return roles;
    }
    roles_at_path(claims, FALLBACK_ROLES_CLAIM)
}

fn roles_at_path(claims: &serde_json::Value, path: &str) -> HashSet<String> {
    let mut current = claims;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(value) => current = value,
            None => return HashSet::new(),
        }
    }

    match current {
        serde_json::Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        serde_json::Value::String(joined) => joined
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => HashSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret";

    fn authenticator() -> Authenticator {
        authenticator_with_roles_claim("roles")
    }

    fn authenticator_with_roles_claim(roles_claim: &str) -> Authenticator {
        let settings = AuthSettings {
            hs256_secret: Some(SECRET.to_string()),
            rs256_public_key_pem: None,
            roles_claim: roles_claim.to_string(),
            exempt_paths: vec!["/control/bootstrap".to_string()],
        };
        Authenticator::new(&settings).unwrap()
    }

    fn mint(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_missing_token() {
        let auth = authenticator();
        assert!(matches!(
            auth.authenticate(None),
            Err(GatewayError::MissingToken)
        ));
        assert!(matches!(
            auth.authenticate(Some("Basic abc")),
            Err(GatewayError::MissingToken)
        ));
        assert!(matches!(
            auth.authenticate(Some("Bearer ")),
            Err(GatewayError::MissingToken)
        ));
    }

    #[test]
    fn test_invalid_signature() {
        let auth = authenticator();
        let token = encode(
            &Header::default(),
            &json!({"sub": "alice", "exp": future_exp()}),
            &EncodingKey::from_secret(b"some-other-secret"),
        )
        .unwrap();

        assert!(matches!(
            auth.authenticate(Some(&format!("Bearer {}", token))),
            Err(GatewayError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_expired_token() {
        let auth = authenticator();
        let token = mint(json!({
            "sub": "alice",
            "exp": chrono::Utc::now().timestamp() - 3600,
        }));

        assert!(matches!(
            auth.authenticate(Some(&format!("Bearer {}", token))),
            Err(GatewayError::ExpiredToken)
        ));
    }

    #[test]
    fn test_principal_extraction() {
        let auth = authenticator();
        let token = mint(json!({
            "preferred_username": "alice",
            "sub": "user-1",
            "roles": ["admin", "editor"],
            "exp": future_exp(),
        }));

        let principal = auth.authenticate(Some(&format!("Bearer {}", token))).unwrap();
        assert_eq!(principal.username, "alice");
        assert!(principal.has_role("admin"));
        assert!(principal.has_role("editor"));
    }

    #[test]
    fn test_username_falls_back_to_sub() {
        let auth = authenticator();
        let token = mint(json!({"sub": "user-1", "exp": future_exp()}));

        let principal = auth.authenticate(Some(&format!("Bearer {}", token))).unwrap();
        assert_eq!(principal.username, "user-1");
        assert!(principal.roles.is_empty());
    }

    #[test]
    fn test_nested_roles_claim_path() {
        let auth = authenticator_with_roles_claim("realm_access.roles");
        let token = mint(json!({
            "sub": "alice",
            "realm_access": {"roles": ["admin"]},
            "exp": future_exp(),
        }));

        let principal = auth.authenticate(Some(&format!("Bearer {}", token))).unwrap();
        assert!(principal.has_role("admin"));
    }

    #[test]
    fn test_comma_separated_roles_string() {
        let auth = authenticator();
        let token = mint(json!({
            "sub": "alice",
            "roles": "admin, editor",
            "exp": future_exp(),
        }));

        let principal = auth.authenticate(Some(&format!("Bearer {}", token))).unwrap();
        assert!(principal.has_role("admin"));
        assert!(principal.has_role("editor"));
    }

    #[test]
    fn test_authorities_fallback() {
        let auth = authenticator();
        let token = mint(json!({
            "sub": "alice",
            "authorities": ["viewer"],
            "exp": future_exp(),
        }));

        let principal = auth.authenticate(Some(&format!("Bearer {}", token))).unwrap();
        assert!(principal.has_role("viewer"));
    }

    #[test]
    fn test_exempt_paths() {
        let auth = authenticator();
        assert!(auth.is_exempt("/control/bootstrap"));
        assert!(!auth.is_exempt("/control/collections"));
        assert!(!auth.is_exempt("/api/projects"));
    }
}
