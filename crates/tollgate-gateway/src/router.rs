//! Route table: maps request paths to upstreams.

use std::time::Duration;

use url::Url;

use crate::config::RouteConfig;

/// A resolved route.
#[derive(Debug, Clone)]
pub struct Route {
    prefix: String,
    upstream: String,
    url: Url,
    timeout: Duration,
    strip_prefix: bool,
    forward_authorization: bool,
}

impl Route {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn forward_authorization(&self) -> bool {
        self.forward_authorization
    }

    /// Whether `path` falls under this route. Matching respects segment
    /// boundaries: `/orders` matches `/orders/1` but not `/orders-archive`.
    fn matches(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => self.prefix == "/" || rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Builds the upstream URL for `path` and an optional query string.
    pub fn target_url(&self, path: &str, query: Option<&str>) -> String {
        let forwarded = if self.strip_prefix && self.prefix != "/" {
            path.strip_prefix(self.prefix.as_str()).unwrap_or(path)
        } else {
            path
        };
        let base = self.url.as_str().trim_end_matches('/');
        let mut target = format!("{base}{forwarded}");
        if target.len() == base.len() {
            target.push('/');
        }
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }
        target
    }
}

/// Routes ordered by descending prefix length, so the first match is the
/// longest.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Builds the table. `default_timeout` applies to routes without their own.
    #[must_use]
    pub fn new(configs: &[RouteConfig], default_timeout: Duration) -> Self {
        let mut routes: Vec<Route> = configs
            .iter()
            .map(|c| {
                let prefix = match c.prefix.trim_end_matches('/') {
                    "" => "/".to_string(),
                    trimmed => trimmed.to_string(),
                };
                Route {
                    prefix,
                    upstream: c.upstream.clone(),
                    url: c.url.clone(),
                    timeout: c.timeout.unwrap_or(default_timeout),
                    strip_prefix: c.strip_prefix,
                    forward_authorization: c.forward_authorization,
                }
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// Longest-prefix match for `path`.
    pub fn find(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Distinct upstream ids.
    pub fn upstreams(&self) -> impl Iterator<Item = &str> {
        let mut seen = std::collections::BTreeSet::new();
        self.routes
            .iter()
            .map(Route::upstream)
            .filter(move |id| seen.insert(*id))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(prefix: &str, upstream: &str, url: &str, strip_prefix: bool) -> RouteConfig {
        RouteConfig {
            prefix: prefix.into(),
            upstream: upstream.into(),
            url: Url::parse(url).unwrap(),
            timeout: None,
            strip_prefix,
            forward_authorization: true,
        }
    }

    fn table() -> RouteTable {
        RouteTable::new(
            &[
                config("/api", "core", "http://core:8080", false),
                config("/api/orders/", "orders", "http://orders:8080/v2", true),
            ],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = table();
        assert_eq!(table.find("/api/orders/42").unwrap().upstream(), "orders");
        assert_eq!(table.find("/api/orders").unwrap().upstream(), "orders");
        assert_eq!(table.find("/api/users").unwrap().upstream(), "core");
        assert!(table.find("/other").is_none());
    }

    #[test]
    fn test_segment_boundaries() {
        let table = table();
        assert_eq!(table.find("/api/orders-archive").unwrap().upstream(), "core");
        assert!(table.find("/apiary").is_none());
    }

    #[test]
    fn test_target_url() {
        let table = table();
        let orders = table.find("/api/orders/42").unwrap();
        assert_eq!(
            orders.target_url("/api/orders/42", Some("expand=items")),
            "http://orders:8080/v2/42?expand=items"
        );
        assert_eq!(orders.target_url("/api/orders", None), "http://orders:8080/v2/");

        let core = table.find("/api/users").unwrap();
        assert_eq!(core.target_url("/api/users", Some("")), "http://core:8080/api/users");
    }

    #[test]
    fn test_root_route_and_upstreams() {
        let table = RouteTable::new(
            &[
                config("/", "fallback", "http://fallback", true),
                config("/a", "a", "http://a", false),
                config("/b", "a", "http://a", false),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(table.find("/anything").unwrap().upstream(), "fallback");
        assert_eq!(table.find("/").unwrap().target_url("/x", None), "http://fallback/x");

        let mut upstreams: Vec<_> = table.upstreams().collect();
        upstreams.sort_unstable();
        assert_eq!(upstreams, ["a", "fallback"]);
        assert_eq!(table.find("/a/1").unwrap().timeout(), Duration::from_secs(5));
    }
}
