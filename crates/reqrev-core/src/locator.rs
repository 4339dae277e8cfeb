#![forbid(unsafe_code)]

//! Page identity from the URL path.
//!
//! A managed page is any `/<namespace>/<resource>[/...]` path whose first
//! segment is not one of the site's own top-level routes. Called on every
//! navigation check, so each call is a single regex match.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;

use crate::config::InjectConfig;

static RESOURCE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/([^/?#]+)/([^/?#]+)").expect("resource path regex"));

/// The `(namespace, resource)` pair a panel is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageIdentity {
    pub namespace: String,
    pub resource: String,
}

impl PageIdentity {
    pub fn new(namespace: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            resource: resource.into(),
        }
    }

    /// `"namespace/resource"`.
    #[must_use]
    pub fn page_id(&self) -> String {
        format!("{}/{}", self.namespace, self.resource)
    }
}

impl fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.resource)
    }
}

/// Classifies URL paths.
#[derive(Debug, Clone)]
pub struct Locator {
    excluded: HashSet<String>,
}

impl Locator {
    pub fn new<I, S>(excluded_namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded: excluded_namespaces
                .into_iter()
                .map(|s| s.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &InjectConfig) -> Self {
        Self::new(&config.excluded_namespaces)
    }

    pub fn is_managed_page(&self, pathname: &str) -> bool {
        self.parse_identity(pathname).is_some()
    }

    pub fn page_id(&self, pathname: &str) -> Option<String> {
        self.parse_identity(pathname).map(|id| id.page_id())
    }

    pub fn parse_identity(&self, pathname: &str) -> Option<PageIdentity> {
        let caps = RESOURCE_PATH.captures(pathname)?;
        let namespace = caps.get(1)?.as_str();
        let resource = caps.get(2)?.as_str();
        if self.excluded.contains(&namespace.to_ascii_lowercase()) {
            return None;
        }
        Some(PageIdentity::new(namespace, resource))
    }
}

impl Default for Locator {
    fn default() -> Self {
        Self::from_config(&InjectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn repository_paths_are_managed() {
        let locator = Locator::default();
        assert!(locator.is_managed_page("/orgA/repoA"));
        assert!(locator.is_managed_page("/orgA/repoA/"));
        assert!(locator.is_managed_page("/orgA/repoA/pulls/12"));
        assert_eq!(
            locator.parse_identity("/orgA/repoA/tree/main/src"),
            Some(PageIdentity::new("orgA", "repoA"))
        );
        assert_eq!(locator.page_id("/orgA/repoA/issues"), Some("orgA/repoA".into()));
    }

    #[test]
    fn short_or_site_paths_are_not_managed() {
        let locator = Locator::default();
        for path in ["/", "", "/orgA", "/orgA/", "//repo", "/settings/profile", "/orgs/acme"] {
            assert!(!locator.is_managed_page(path), "{path} should not be managed");
            assert_eq!(locator.page_id(path), None);
        }
    }

    #[test]
    fn exclusions_ignore_case() {
        let locator = Locator::new(["Settings"]);
        assert!(!locator.is_managed_page("/SETTINGS/keys"));
        assert!(locator.is_managed_page("/orgs/acme"));
    }

    #[test]
    fn query_and_fragment_do_not_leak_into_identity() {
        let locator = Locator::default();
        assert_eq!(
            locator.parse_identity("/orgA/repoA?tab=readme"),
            Some(PageIdentity::new("orgA", "repoA"))
        );
        assert_eq!(
            locator.parse_identity("/orgA/repoA#readme"),
            Some(PageIdentity::new("orgA", "repoA"))
        );
    }

    proptest! {
        #[test]
        fn identity_matches_first_two_segments(
            ns in "[a-zA-Z0-9][a-zA-Z0-9-]{0,20}",
            res in "[a-zA-Z0-9._-]{1,30}",
            tail in prop::collection::vec("[a-z0-9]{1,8}", 0..4),
        ) {
            let locator = Locator::new(Vec::<String>::new());
            let mut path = format!("/{ns}/{res}");
            for seg in &tail {
                path.push('/');
                path.push_str(seg);
            }
            let id = locator.parse_identity(&path).expect("two segments always match");
            prop_assert_eq!(&id.namespace, &ns);
            prop_assert_eq!(&id.resource, &res);
            prop_assert_eq!(locator.page_id(&path), Some(format!("{ns}/{res}")));
        }

        #[test]
        fn arbitrary_paths_never_panic(path in ".{0,80}") {
            let locator = Locator::default();
            let managed = locator.is_managed_page(&path);
            prop_assert_eq!(managed, locator.parse_identity(&path).is_some());
        }
    }
}
