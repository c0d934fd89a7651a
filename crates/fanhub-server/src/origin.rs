//! WebSocket origin policy: an explicit allow-list plus a development
//! wildcard (§6). Checked once at upgrade time, before the handshake is
//! accepted.

#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    allow_any: bool,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>, allow_any: bool) -> Self {
        Self { allowed, allow_any }
    }

    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        if self.allow_any {
            return true;
        }
        match origin {
            Some(origin) => self.allowed.iter().any(|a| a == origin),
            // No Origin header at all (e.g. a non-browser client) is allowed
            // only under the explicit development wildcard.
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_matches_exact_origin() {
        let policy = OriginPolicy::new(vec!["https://app.example.com".to_string()], false);
        assert!(policy.is_allowed(Some("https://app.example.com")));
        assert!(!policy.is_allowed(Some("https://evil.example.com")));
    }

    #[test]
    fn dev_wildcard_allows_anything() {
        let policy = OriginPolicy::new(vec![], true);
        assert!(policy.is_allowed(Some("https://anything.example.com")));
        assert!(policy.is_allowed(None));
    }

    #[test]
    fn missing_origin_is_rejected_without_wildcard() {
        let policy = OriginPolicy::new(vec!["https://app.example.com".to_string()], false);
        assert!(!policy.is_allowed(None));
    }
}
