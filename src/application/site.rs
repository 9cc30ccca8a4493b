//! Platform-wide addressing: the root domain and how public URLs are built.

use crate::domain::{
    entities::BlogRecord,
    hosts::{HostResolution, build_secure_redirect_url, normalize_host, resolve_host},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteContext {
    pub root_domain: String,
    pub local_mode: bool,
    /// Port appended to generated URLs in local mode.
    pub local_port: Option<u16>,
}

impl SiteContext {
    pub fn new(root_domain: impl Into<String>) -> Self {
        Self {
            root_domain: root_domain.into(),
            local_mode: false,
            local_port: None,
        }
    }

    pub fn resolve(&self, host: &str) -> HostResolution {
        resolve_host(host, &self.root_domain, self.local_mode)
    }

    /// Absolute base URL of a blog, without a trailing slash.
    pub fn blog_base_url(&self, blog: &BlogRecord) -> String {
        if self.local_mode && !blog.uses_custom_domain() {
            let port = self.local_port.map(|p| format!(":{p}")).unwrap_or_default();
            format!("http://{}.localhost{port}", blog.subdomain)
        } else {
            format!("https://{}", blog.domain(&self.root_domain))
        }
    }

    /// Location to send a request to when the blog must be served from its custom domain.
    pub fn custom_domain_redirect(
        &self,
        blog: &BlogRecord,
        request_host: &str,
        path_and_query: &str,
    ) -> Option<String> {
        let host = normalize_host(request_host);
        if !blog.should_redirect_to_custom_domain(&host) {
            return None;
        }
        let domain = blog.custom_domain.as_deref()?;
        let location = build_secure_redirect_url(domain, path_and_query, &self.root_domain);
        if location.is_none() {
            tracing::warn!(
                target = "willow::application::site",
                blog_id = %blog.id,
                custom_domain = domain,
                "Refusing redirect to unsafe custom domain"
            );
        }
        location
    }
}
