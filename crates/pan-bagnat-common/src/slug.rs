//! Slug validation and host-name derivation.
//!
//! Module and page slugs are DNS-safe (`[a-z0-9-]+`) and immutable after
//! creation. The page proxy derives the slug from the request host; the
//! gateway controller derives container names from page slugs.

/// Returns true if `s` is a valid slug: non-empty, only `[a-z0-9-]`.
pub fn is_valid_slug(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Collapse an arbitrary string into a DNS-safe label: lowercase, any
/// character outside `[a-z0-9-]` becomes `-`, surrounding dashes trimmed.
/// An empty result falls back to `"page"`.
pub fn dns_safe_slug(s: &str) -> String {
    let collapsed: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = collapsed.trim_matches('-');
    if trimmed.is_empty() {
        "page".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Container name of the gateway serving a page slug.
pub fn gateway_name(slug: &str) -> String {
    format!("gateway-{}", dns_safe_slug(slug))
}

/// Derive the page slug from a request host.
///
/// Each allowed suffix is normalized to start with a dot. The host is
/// lowercased, the port and any trailing dot stripped. When the host ends
/// with a suffix and the remaining prefix is a valid slug, that prefix is
/// the page slug.
pub fn extract_slug(host: &str, allowed_suffixes: &[String]) -> Option<String> {
    let host = host.to_lowercase();
    let host = host.split(':').next().unwrap_or("");
    let host = host.trim_end_matches('.');
    if host.is_empty() {
        return None;
    }

    for suffix in allowed_suffixes {
        let suffix = if suffix.starts_with('.') {
            suffix.clone()
        } else {
            format!(".{suffix}")
        };
        if let Some(prefix) = host.strip_suffix(&suffix)
            && is_valid_slug(prefix)
        {
            return Some(prefix.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffixes() -> Vec<String> {
        vec!["modules.example.com".to_string()]
    }

    #[test]
    fn test_is_valid_slug() {
        assert!(is_valid_slug("my-app-2"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("My-App"));
        assert!(!is_valid_slug("app.web"));
        assert!(!is_valid_slug("app_web"));
    }

    #[test]
    fn test_dns_safe_slug_collapses() {
        assert_eq!(dns_safe_slug("My App"), "my-app");
        assert_eq!(dns_safe_slug("app.web"), "app-web");
        assert_eq!(dns_safe_slug("--app--"), "app");
        assert_eq!(dns_safe_slug("!!!"), "page");
        assert_eq!(dns_safe_slug(""), "page");
    }

    #[test]
    fn test_gateway_name() {
        assert_eq!(gateway_name("app"), "gateway-app");
        assert_eq!(gateway_name("My App"), "gateway-my-app");
    }

    #[test]
    fn test_extract_slug_happy_path() {
        assert_eq!(
            extract_slug("app.modules.example.com", &suffixes()),
            Some("app".to_string())
        );
    }

    #[test]
    fn test_extract_slug_strips_port_and_case() {
        assert_eq!(
            extract_slug("APP.Modules.Example.Com:443", &suffixes()),
            Some("app".to_string())
        );
    }

    #[test]
    fn test_extract_slug_trailing_dot() {
        assert_eq!(
            extract_slug("app.modules.example.com.", &suffixes()),
            Some("app".to_string())
        );
    }

    #[test]
    fn test_extract_slug_rejects_bad_prefix() {
        assert_eq!(extract_slug("a_b.modules.example.com", &suffixes()), None);
        assert_eq!(extract_slug("modules.example.com", &suffixes()), None);
        assert_eq!(extract_slug("app.other.example.com", &suffixes()), None);
    }

    #[test]
    fn test_extract_slug_suffix_with_leading_dot() {
        let s = vec![".modules.example.com".to_string()];
        assert_eq!(
            extract_slug("app.modules.example.com", &s),
            Some("app".to_string())
        );
    }

    #[test]
    fn test_extract_slug_rejects_nested_subdomain() {
        assert_eq!(
            extract_slug("a.b.modules.example.com", &suffixes()),
            None,
            "dots are not valid slug characters"
        );
    }
}
