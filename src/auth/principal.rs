//! The authenticated identity attached to a request.

use std::collections::HashSet;

/// The authenticated identity and role set derived from a validated token
///
/// Request-scoped and immutable: the role set is never mutated after
/// construction, which is what makes lock-free policy evaluation against a
/// configuration snapshot safe.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Username from the `preferred_username` claim, falling back to `sub`
    pub username: String,
    /// Roles extracted from the configured roles claim
    pub roles: HashSet<String>,
    /// All claims of the validated token, for downstream enrichment
    pub claims: serde_json::Value,
}

impl Principal {
    /// Create a principal from its parts
    pub fn new(
        username: impl Into<String>,
        roles: impl IntoIterator<Item = String>,
        claims: serde_json::Value,
    ) -> Self {
        Self {
            username: username.into(),
            roles: roles.into_iter().collect(),
            claims,
        }
    }

    /// Whether this principal holds the given role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether this principal holds at least one of the given roles
    pub fn has_any_role<'a>(&self, roles: impl IntoIterator<Item = &'a String>) -> bool {
        roles.into_iter().any(|role| self.roles.contains(role))
    }

    /// Comma-joined, sorted role list for the `X-Forwarded-Roles` header
    pub fn roles_header_value(&self) -> String {
        let mut roles: Vec<&str> = self.roles.iter().map(String::as_str).collect();
        roles.sort_unstable();
        roles.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_checks() {
        let principal = Principal::new(
            "alice",
            ["admin".to_string(), "editor".to_string()],
            json!({}),
        );

        assert!(principal.has_role("admin"));
        assert!(!principal.has_role("viewer"));
        assert!(principal.has_any_role(&["viewer".to_string(), "editor".to_string()]));
        assert!(!principal.has_any_role(&["viewer".to_string()]));
    }

    #[test]
    fn test_roles_header_is_sorted() {
        let principal = Principal::new(
            "alice",
            ["editor".to_string(), "admin".to_string()],
            json!({}),
        );
        assert_eq!(principal.roles_header_value(), "admin,editor");
    }
}
