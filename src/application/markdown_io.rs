//! Markdown documents with a YAML frontmatter block, used for post export and import.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime, format_description::well_known::Rfc3339, macros::format_description};

use crate::domain::{entities::PostRecord, posts::PostInput};

const DELIMITER: &str = "---";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrontmatterError {
    #[error("No content provided")]
    Empty,
    #[error("frontmatter is invalid: {0}")]
    Invalid(String),
    #[error("frontmatter published_at `{0}` is not a valid timestamp")]
    Timestamp(String),
}

#[derive(Serialize)]
struct ExportedFrontmatter<'a> {
    title: &'a str,
    slug: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta_description: Option<&'a str>,
    published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<String>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ImportedFrontmatter {
    title: Option<String>,
    slug: Option<String>,
    meta_description: Option<String>,
    published: Option<bool>,
    published_at: Option<String>,
    tags: Option<Vec<String>>,
}

/// Result of reading a markdown document. Problems with the frontmatter do not
/// abort the import; they are reported alongside the attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedPost {
    pub input: PostInput,
    pub problems: Vec<FrontmatterError>,
}

pub fn post_to_markdown(post: &PostRecord) -> Result<String, FrontmatterError> {
    let published_at = post
        .published_at
        .map(|ts| ts.format(&Rfc3339))
        .transpose()
        .map_err(|err| FrontmatterError::Invalid(err.to_string()))?;
    let frontmatter = ExportedFrontmatter {
        title: &post.title,
        slug: &post.slug,
        meta_description: post.meta_description.as_deref(),
        published: post.published,
        published_at,
        tags: &post.tag_list,
    };
    let yaml = serde_yaml::to_string(&frontmatter)
        .map_err(|err| FrontmatterError::Invalid(err.to_string()))?;
    let body = post.body_markdown.as_deref().unwrap_or_default();

    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n\n{body}"))
}

/// Every frontmatter key overwrites the post, so missing keys clear their attribute.
pub fn parse_markdown_document(text: &str) -> Result<ImportedPost, FrontmatterError> {
    if text.trim().is_empty() {
        return Err(FrontmatterError::Empty);
    }

    let mut problems = Vec::new();
    let (frontmatter, body) = match split_frontmatter(text) {
        Some((yaml, body)) => match parse_yaml(yaml) {
            Ok(frontmatter) => (frontmatter, body.to_string()),
            Err(err) => {
                problems.push(err);
                (ImportedFrontmatter::default(), text.to_string())
            }
        },
        None => (ImportedFrontmatter::default(), text.to_string()),
    };

    let published_at = match frontmatter.published_at.as_deref().map(parse_timestamp) {
        Some(Ok(ts)) => Some(ts),
        Some(Err(err)) => {
            problems.push(err);
            None
        }
        None => None,
    };

    let input = PostInput {
        title: Some(frontmatter.title.unwrap_or_default()),
        slug: frontmatter.slug.filter(|slug| !slug.trim().is_empty()),
        body_markdown: Some(body),
        meta_description: Some(frontmatter.meta_description.unwrap_or_default()),
        published: Some(frontmatter.published.unwrap_or(false)),
        published_at,
        featured: None,
        tag_list: Some(frontmatter.tags.unwrap_or_default()),
    };

    Ok(ImportedPost { input, problems })
}

fn parse_yaml(yaml: &str) -> Result<ImportedFrontmatter, FrontmatterError> {
    if yaml.trim().is_empty() {
        return Ok(ImportedFrontmatter::default());
    }
    serde_yaml::from_str(yaml).map_err(|err| FrontmatterError::Invalid(err.to_string()))
}

/// Split a leading `---` block from the body. `None` when the text has no frontmatter.
fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\r\n")
        .or_else(|| text.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == DELIMITER {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body.trim_start_matches(['\r', '\n'])));
        }
        offset += line.len();
    }
    None
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, FrontmatterError> {
    let raw = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(ts);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|date| date.midnight().assume_utc())
        .map_err(|_| FrontmatterError::Timestamp(raw.to_string()))
}
