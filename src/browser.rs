//! Decides where a link opens
//!
//! Links on an allowed domain (or one of its subdomains) open in the in-app
//! browser; everything else is handed to the system browser.

use crate::error::{LinkSwipeError, Result};
use crate::links::parse_http_url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenTarget {
    InApp,
    External,
}

#[derive(Debug, Clone, Default)]
pub struct BrowserService {
    allowed_domains: HashSet<String>,
}

impl BrowserService {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut service = Self::default();
        for domain in domains {
            // Invalid entries are skipped
            let _ = service.allow_domain(domain.as_ref());
        }
        service
    }

    pub fn allow_domain(&mut self, domain: &str) -> Result<bool> {
        let domain = normalize(domain)?;
        debug!("Allowing domain {}", domain);
        Ok(self.allowed_domains.insert(domain))
    }

    pub fn disallow_domain(&mut self, domain: &str) -> bool {
        match normalize(domain) {
            Ok(domain) => self.allowed_domains.remove(&domain),
            Err(_) => false,
        }
    }

    pub fn allowed_domains(&self) -> impl Iterator<Item = &str> {
        self.allowed_domains.iter().map(String::as_str)
    }

    /// Whether `url`'s host is an allowed domain or a subdomain of one
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = parse_http_url(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        self.allowed_domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn open_target(&self, url: &str) -> OpenTarget {
        if self.is_allowed(url) {
            OpenTarget::InApp
        } else {
            OpenTarget::External
        }
    }
}

fn normalize(domain: &str) -> Result<String> {
    let domain = domain.trim().trim_matches('.').to_ascii_lowercase();
    if domain.is_empty() || domain.contains(&['/', ':', ' '][..]) {
        return Err(LinkSwipeError::InvalidInput(format!(
            "invalid domain '{}'",
            domain
        )));
    }
    Ok(domain)
}
