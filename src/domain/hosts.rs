//! Host header resolution and the custom-domain redirect guards.

use url::Host;

const MAX_DOMAIN_LENGTH: usize = 253;
const MAX_REDIRECT_PATH: usize = 2048;
const LOOPBACK_MARKERS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "::1"];

/// Which tenant a request host addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResolution {
    Root,
    Subdomain(String),
    CustomDomain(String),
}

/// Strip the port and lowercase. IPv6 literals keep their brackets removed.
pub fn normalize_host(host: &str) -> String {
    let trimmed = host.trim();
    let without_port = if let Some(rest) = trimmed.strip_prefix('[') {
        rest.split(']').next().unwrap_or_default()
    } else {
        match trimmed.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
                name
            }
            _ => trimmed,
        }
    };
    without_port.trim_end_matches('.').to_ascii_lowercase()
}

pub fn resolve_host(host: &str, root_domain: &str, local_mode: bool) -> HostResolution {
    let host = normalize_host(host);
    let root_domain = root_domain.to_ascii_lowercase();

    if host.is_empty() || host == root_domain || (local_mode && host == "localhost") {
        return HostResolution::Root;
    }

    let subdomain = host
        .strip_suffix(&format!(".{root_domain}"))
        .or_else(|| local_mode.then(|| host.strip_suffix(".localhost")).flatten());

    match subdomain {
        Some(prefix) => match prefix.split('.').next() {
            Some(label) if !label.is_empty() => HostResolution::Subdomain(label.to_string()),
            _ => HostResolution::Root,
        },
        None => HostResolution::CustomDomain(host),
    }
}

/// A custom domain is only a redirect target if it is a public DNS name outside the platform.
pub fn valid_redirect_domain(domain: &str, root_domain: &str) -> bool {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LENGTH {
        return false;
    }
    if !is_dns_shaped(domain) {
        return false;
    }
    if LOOPBACK_MARKERS.iter().any(|marker| domain.contains(marker)) {
        return false;
    }
    if matches!(Host::parse(domain), Ok(Host::Ipv4(_)) | Ok(Host::Ipv6(_))) {
        return false;
    }
    let root_domain = root_domain.to_ascii_lowercase();
    domain != root_domain && !domain.ends_with(&format!(".{root_domain}"))
}

pub fn sanitize_redirect_path(path: &str) -> String {
    if path.trim().is_empty() {
        return "/".to_string();
    }

    let mut cleaned: String = path
        .chars()
        .filter(|c| !matches!(*c, '\u{0}'..='\u{1f}' | '\u{7f}'))
        .collect();
    if !cleaned.starts_with('/') {
        cleaned.insert(0, '/');
    }
    cleaned.chars().take(MAX_REDIRECT_PATH).collect()
}

/// `https://{domain}{path}` when both pieces pass their guards.
pub fn build_secure_redirect_url(domain: &str, path: &str, root_domain: &str) -> Option<String> {
    valid_redirect_domain(domain, root_domain)
        .then(|| format!("https://{domain}{}", sanitize_redirect_path(path)))
}

/// Labels of `[a-z0-9-]`, at least two of them, the last alphabetic with two or more characters.
fn is_dns_shaped(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let Some((tld, rest)) = labels.split_last() else {
        return false;
    };
    let labels_ok = rest.iter().all(|label| {
        !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    labels_ok && tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_lowercase())
}
