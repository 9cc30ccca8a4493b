//! Blog normalization and validation rules.

use unicode_segmentation::UnicodeSegmentation;
use url::Host;

use crate::domain::error::ValidationErrors;

pub const MAX_BLOGS_PER_USER: i64 = 2;
pub const DEFAULT_THEME: &str = "light";
pub const THEMES: &[&str] = &["light", "dark", "sepia", "forest", "ocean"];

const SUBDOMAIN_MIN: usize = 3;
const SUBDOMAIN_MAX: usize = 63;
const TITLE_MAX: usize = 255;
const META_DESCRIPTION_MAX: usize = 255;
const FOOTER_MARKDOWN_MAX: usize = 10_000;

/// Names that would collide with platform hosts or routes.
pub const RESERVED_SUBDOMAINS: &[&str] = &[
    "about", "admin", "api", "app", "assets", "auth", "billing", "blog", "cdn", "dashboard",
    "dev", "docs", "email", "ftp", "help", "imap", "login", "logout", "mail", "news", "pop",
    "register", "root", "rss", "security", "settings", "signup", "smtp", "staging", "static",
    "status", "support", "test", "www",
];

/// Editable blog attributes, normalized before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlogSettings {
    pub subdomain: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub favicon_emoji: Option<String>,
    pub custom_domain: Option<String>,
    pub theme: Option<String>,
    pub post_footer_markdown: Option<String>,
    pub no_index: bool,
    pub primary: bool,
}

impl BlogSettings {
    pub fn normalized(mut self) -> Self {
        self.subdomain = normalize_subdomain(&self.subdomain);
        self.custom_domain = self.custom_domain.as_deref().and_then(normalize_custom_domain);
        self.title = blank_to_none(self.title);
        self.meta_description = blank_to_none(self.meta_description);
        self.favicon_emoji = blank_to_none(self.favicon_emoji);
        self.post_footer_markdown = blank_to_none(self.post_footer_markdown);
        self.theme = blank_to_none(self.theme);
        self
    }

    /// Attribute-level checks; uniqueness and per-user limits need storage and live in the service.
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if let Err(message) = validate_subdomain(&self.subdomain) {
            errors.add("subdomain", message);
        }
        check_length(&mut errors, "title", self.title.as_deref(), TITLE_MAX);
        check_length(
            &mut errors,
            "meta_description",
            self.meta_description.as_deref(),
            META_DESCRIPTION_MAX,
        );
        check_length(
            &mut errors,
            "post_footer_markdown",
            self.post_footer_markdown.as_deref(),
            FOOTER_MARKDOWN_MAX,
        );
        if let Some(emoji) = self.favicon_emoji.as_deref()
            && !is_single_emoji(emoji)
        {
            errors.add("favicon_emoji", "must be a single emoji");
        }
        if let Some(domain) = self.custom_domain.as_deref()
            && !is_valid_custom_domain(domain)
        {
            errors.add("custom_domain", "must be a valid domain name");
        }
        if let Some(theme) = self.theme.as_deref()
            && !THEMES.contains(&theme)
        {
            errors.add("theme", "is not included in the list");
        }

        errors
    }
}

pub fn normalize_subdomain(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

pub fn normalize_custom_domain(value: &str) -> Option<String> {
    let normalized = value.trim().to_ascii_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

pub fn validate_subdomain(subdomain: &str) -> Result<(), &'static str> {
    if subdomain.is_empty() {
        return Err("can't be blank");
    }
    if !subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err("may only contain letters and numbers");
    }
    if subdomain.len() < SUBDOMAIN_MIN {
        return Err("is too short (minimum is 3 characters)");
    }
    if subdomain.len() > SUBDOMAIN_MAX {
        return Err("is too long (maximum is 63 characters)");
    }
    if RESERVED_SUBDOMAINS.contains(&subdomain) {
        return Err("is reserved");
    }
    Ok(())
}

/// Shape check standing in for a public-suffix lookup: dotted labels ending in an alphabetic TLD.
pub fn is_valid_custom_domain(domain: &str) -> bool {
    let candidate = domain.trim().to_ascii_lowercase();
    let candidate = candidate.strip_suffix('.').unwrap_or(&candidate);

    if candidate.is_empty() || candidate.contains("..") || candidate.chars().any(char::is_control) {
        return false;
    }
    if matches!(Host::parse(candidate), Ok(Host::Ipv4(_)) | Ok(Host::Ipv6(_))) {
        return false;
    }

    let labels: Vec<&str> = candidate.split('.').collect();
    if labels.len() < 2 {
        return false;
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_lowercase()));

    labels_ok && tld_ok
}

/// One grapheme that is a fully-qualified emoji: ZWJ sequences, skin tones, keycaps and flags
/// pass; text-presentation symbols such as `™` or arrows do not.
pub fn is_single_emoji(value: &str) -> bool {
    value.graphemes(true).count() == 1
        && emojis::get(value).is_some_and(|emoji| emoji.as_str() == value)
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn check_length(errors: &mut ValidationErrors, field: &'static str, value: Option<&str>, max: usize) {
    if let Some(value) = value
        && value.chars().count() > max
    {
        errors.add(field, format!("is too long (maximum is {max} characters)"));
    }
}
