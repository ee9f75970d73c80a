//! Service classification: maps a request host to a logical service

use tracing::{trace, warn};

use crate::config::settings::ServiceConfig;
use crate::models::Service;
use crate::utils::extract_host;

/// Ordered table of `(service, host patterns)`; declaration order is match priority
#[derive(Debug, Clone, Default)]
pub struct ServiceClassifier {
    table: Vec<(Service, Vec<String>)>,
}

impl ServiceClassifier {
    pub fn new(table: Vec<(Service, Vec<String>)>) -> Self {
        let table = table
            .into_iter()
            .map(|(service, patterns)| {
                let patterns = patterns
                    .iter()
                    .map(|p| normalize_pattern(p))
                    .filter(|p| !p.is_empty())
                    .collect();
                (service, patterns)
            })
            .collect::<Vec<_>>();

        let classifier = Self { table };
        for (pattern, first, second) in classifier.overlaps() {
            warn!(
                "⚠️  Host pattern '{}' is claimed by both '{}' and '{}'; '{}' wins",
                pattern, first, second, first
            );
        }
        classifier
    }

    pub fn from_config(services: &[ServiceConfig]) -> Self {
        Self::new(
            services
                .iter()
                .map(|s| (Service::new(s.name.clone()), s.patterns.clone()))
                .collect(),
        )
    }

    /// Classify a bare host name
    pub fn classify(&self, host: &str) -> Option<Service> {
        let host = normalize_pattern(host);
        if host.is_empty() {
            return None;
        }
        let found = self
            .table
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| host_matches(&host, p)))
            .map(|(service, _)| service.clone());
        if found.is_none() {
            trace!("No service for host {}", host);
        }
        found
    }

    /// Classify the host of an absolute URL
    pub fn classify_url(&self, url: &str) -> Option<Service> {
        extract_host(url).and_then(|host| self.classify(&host))
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.table.iter().map(|(service, _)| service)
    }

    pub fn is_known(&self, service: &Service) -> bool {
        self.table.iter().any(|(s, _)| s == service)
    }

    /// Patterns that a later service can never win because an earlier one matches first
    pub fn overlaps(&self) -> Vec<(String, Service, Service)> {
        let mut found = Vec::new();
        for (i, (later, later_patterns)) in self.table.iter().enumerate() {
            for pattern in later_patterns {
                if let Some((earlier, _)) = self.table[..i]
                    .iter()
                    .find(|(_, ps)| ps.iter().any(|p| host_matches(pattern, p)))
                {
                    found.push((pattern.clone(), earlier.clone(), later.clone()));
                }
            }
        }
        found
    }
}

/// Exact match, or suffix match on a dot boundary
pub fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern
        || (host.len() > pattern.len()
            && host.ends_with(pattern)
            && host.as_bytes()[host.len() - pattern.len() - 1] == b'.')
}

fn normalize_pattern(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ServiceClassifier {
        ServiceClassifier::new(vec![
            (
                Service::from("code-hosting"),
                vec!["github.com".to_string(), "raw.githubusercontent.com".to_string()],
            ),
            (
                Service::from("game-platform"),
                vec!["steamcommunity.com".to_string(), "store.steampowered.com".to_string()],
            ),
            (Service::from("registry"), vec!["docker.io".to_string(), "hub.docker.com".to_string()]),
            (Service::from("translate"), vec!["translate.googleapis.com".to_string()]),
        ])
    }

    #[test]
    fn test_exact_match() {
        let c = classifier();
        assert_eq!(c.classify("github.com"), Some(Service::from("code-hosting")));
        assert_eq!(c.classify("docker.io"), Some(Service::from("registry")));
    }

    #[test]
    fn test_subdomain_matches_same_service() {
        let c = classifier();
        for host in ["github.com", "docker.io", "steamcommunity.com", "translate.googleapis.com"] {
            let sub = format!("sub.{}", host);
            assert_eq!(c.classify(host), c.classify(&sub), "host {}", host);
            assert!(c.classify(&sub).is_some());
        }
    }

    #[test]
    fn test_suffix_requires_dot_boundary() {
        let c = classifier();
        assert_eq!(c.classify("notgithub.com"), None);
        assert_eq!(c.classify("github.com.evil.net"), None);
        assert_eq!(c.classify("example.org"), None);
        assert_eq!(c.classify(""), None);
    }

    #[test]
    fn test_case_and_trailing_dot_ignored() {
        let c = classifier();
        assert_eq!(c.classify("GitHub.COM."), Some(Service::from("code-hosting")));
    }

    #[test]
    fn test_classify_url() {
        let c = classifier();
        assert_eq!(
            c.classify_url("https://raw.githubusercontent.com/rust-lang/rust/master/README.md"),
            Some(Service::from("code-hosting"))
        );
        assert_eq!(c.classify_url("not a url"), None);
    }

    #[test]
    fn test_first_declared_wins_on_overlap() {
        let c = ServiceClassifier::new(vec![
            (Service::from("first"), vec!["example.com".to_string()]),
            (Service::from("second"), vec!["api.example.com".to_string()]),
        ]);
        assert_eq!(c.classify("api.example.com"), Some(Service::from("first")));
        let overlaps = c.overlaps();
        assert_eq!(overlaps.len(), 1);
        assert_eq!(overlaps[0].0, "api.example.com");
    }

    #[test]
    fn test_known_services() {
        let c = classifier();
        assert!(c.is_known(&Service::from("translate")));
        assert!(!c.is_known(&Service::from("video")));
        assert_eq!(c.services().count(), 4);
    }
}
