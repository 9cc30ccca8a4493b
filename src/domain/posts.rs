//! Post and page write rules: attribute normalization, validation and publish bookkeeping.

use time::OffsetDateTime;

use crate::domain::error::ValidationErrors;

pub const TITLE_MAX: usize = 255;
pub const BODY_MAX: usize = 100_000;
pub const META_DESCRIPTION_MAX: usize = 255;
pub const UNTITLED_TITLE: &str = "Untitled";

const MERMAID_FENCE: &str = "```mermaid";

/// Author-supplied attributes for creating or updating a post.
///
/// `None` on update means "leave unchanged"; on create it means "use the default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostInput {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub body_markdown: Option<String>,
    pub meta_description: Option<String>,
    pub published: Option<bool>,
    pub published_at: Option<OffsetDateTime>,
    pub featured: Option<bool>,
    pub tag_list: Option<Vec<String>>,
}

/// Fully resolved attribute set, ready to be validated and persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PostAttributes {
    pub title: String,
    pub body_markdown: Option<String>,
    pub meta_description: Option<String>,
    pub published: bool,
    pub published_at: Option<OffsetDateTime>,
    pub featured: bool,
    pub tag_list: Vec<String>,
}

impl PostAttributes {
    /// Overlay `input` onto the current attributes.
    pub fn apply(mut self, input: &PostInput) -> Self {
        if let Some(title) = &input.title {
            self.title = title.trim().to_string();
        }
        if let Some(body) = &input.body_markdown {
            self.body_markdown = Some(body.clone());
        }
        if let Some(meta) = &input.meta_description {
            let trimmed = meta.trim();
            self.meta_description = (!trimmed.is_empty()).then(|| trimmed.to_string());
        }
        if let Some(published) = input.published {
            self.published = published;
        }
        if input.published_at.is_some() {
            self.published_at = input.published_at;
        }
        if let Some(featured) = input.featured {
            self.featured = featured;
        }
        if let Some(tags) = &input.tag_list {
            self.tag_list = normalize_tag_list(tags.iter().map(String::as_str));
        }
        self
    }

    /// Published posts always carry a publication time.
    pub fn stamp_publication(&mut self, now: OffsetDateTime) {
        if self.published && self.published_at.is_none() {
            self.published_at = Some(now);
        }
    }

    pub fn has_mermaid_diagrams(&self) -> bool {
        self.body_markdown.as_deref().is_some_and(contains_mermaid)
    }

    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if self.title.trim().is_empty() {
            errors.add("title", "can't be blank");
        } else if self.title.chars().count() > TITLE_MAX {
            errors.add("title", format!("is too long (maximum is {TITLE_MAX} characters)"));
        }
        if let Some(body) = &self.body_markdown
            && body.chars().count() > BODY_MAX
        {
            errors.add(
                "body_markdown",
                format!("is too long (maximum is {BODY_MAX} characters)"),
            );
        }
        if let Some(meta) = &self.meta_description
            && meta.chars().count() > META_DESCRIPTION_MAX
        {
            errors.add(
                "meta_description",
                format!("is too long (maximum is {META_DESCRIPTION_MAX} characters)"),
            );
        }
        if self.published && self.published_at.is_none() {
            errors.add("published_at", "can't be blank");
        }

        errors
    }
}

impl Default for PostAttributes {
    fn default() -> Self {
        Self {
            title: String::new(),
            body_markdown: None,
            meta_description: None,
            published: false,
            published_at: None,
            featured: false,
            tag_list: Vec::new(),
        }
    }
}

pub fn contains_mermaid(markdown: &str) -> bool {
    markdown.contains(MERMAID_FENCE)
}

/// Trim names, drop blanks and remove case-insensitive duplicates, keeping first spelling.
pub fn normalize_tag_list<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut tags = Vec::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            continue;
        }
        let folded = trimmed.to_lowercase();
        if seen.contains(&folded) {
            continue;
        }
        seen.push(folded);
        tags.push(trimmed.to_string());
    }
    tags
}

/// Comma-separated form used by forms and the API.
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    normalize_tag_list(raw.split(','))
}

/// Whether an update must recompute the slug: the title moved and the post is not live yet.
pub fn slug_needs_regeneration(old_title: &str, new_title: &str, published: bool) -> bool {
    !published && old_title != new_title
}
