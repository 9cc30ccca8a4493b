//! Answers whether the TLS terminator may issue a certificate for a host.

use std::sync::Arc;

use crate::application::repos::{BlogsRepo, RepoError};
use crate::domain::hosts::normalize_host;

#[derive(Clone)]
pub struct DomainValidationService {
    blogs: Arc<dyn BlogsRepo>,
    root_domain: String,
}

impl DomainValidationService {
    pub fn new(blogs: Arc<dyn BlogsRepo>, root_domain: impl Into<String>) -> Self {
        Self {
            blogs,
            root_domain: root_domain.into().to_ascii_lowercase(),
        }
    }

    /// `true` for the root domain, any of its subdomains, or a configured custom domain.
    pub async fn validate(&self, domain: Option<&str>) -> Result<bool, RepoError> {
        let Some(domain) = domain.map(normalize_host).filter(|domain| !domain.is_empty()) else {
            return Ok(false);
        };

        if domain == self.root_domain || domain.ends_with(&format!(".{}", self.root_domain)) {
            return Ok(true);
        }

        Ok(self.blogs.find_by_custom_domain(&domain).await?.is_some())
    }
}
