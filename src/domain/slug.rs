//! Slug derivation for posts, pages and tags.
//!
//! Titles are transliterated to ASCII (`slug` crate, with `pinyin` covering
//! Chinese) and then sequenced per blog: the first post titled "Hello" owns
//! `hello`, the next `hello-2`, and so on. The persistence layer supplies the
//! current highest suffix; everything here stays pure.

use pinyin::{Pinyin, ToPinyin};
use slug::slugify;
use thiserror::Error;
use uuid::Uuid;

const UNTITLED_PREFIX: &str = "untitled";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
}

/// Base slug plus the per-blog sequence number it was assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedSlug {
    pub base: String,
    pub suffix: i32,
}

impl SequencedSlug {
    /// Allocate the next slot after `max_suffix`, the highest suffix already used for `base`.
    pub fn next(base: String, max_suffix: Option<i32>) -> Self {
        let suffix = max_suffix.map_or(1, |max| max.saturating_add(1).max(1));
        Self { base, suffix }
    }

    pub fn slug(&self) -> String {
        if self.suffix > 1 {
            format!("{}-{}", self.base, self.suffix)
        } else {
            self.base.clone()
        }
    }
}

/// Derive a base slug from human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let transliterated = transliterate_to_ascii(input);
    let candidate = slugify(&transliterated);

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Base slug for a post title. Titles that parameterize to nothing get a random `untitled-xxxxxxxx`.
pub fn base_slug_for_title(title: &str) -> String {
    derive_slug(title).unwrap_or_else(|_| untitled_slug())
}

/// Slugs tried for one tag before the write gives up.
pub const MAX_TAG_SLUG_ATTEMPTS: i32 = 100;

/// Tag names that differ only by case name the same tag.
pub fn same_tag_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Tag slugs fall back to the lowercased name when it parameterizes to nothing.
pub fn tag_slug(name: &str) -> String {
    derive_slug(name).unwrap_or_else(|_| name.to_lowercase())
}

pub fn untitled_slug() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{UNTITLED_PREFIX}-{}", &random[..8])
}

fn transliterate_to_ascii(input: &str) -> String {
    let mut output = String::with_capacity(input.len());

    for ch in input.chars() {
        if ch.is_ascii() {
            output.push(ch);
            continue;
        }

        match ch.to_pinyin() {
            Some(py) => append_pinyin(&mut output, py),
            None if ch.is_whitespace() => output.push(' '),
            // slugify strips or folds what is left
            None => output.push(ch),
        }
    }

    output
}

fn append_pinyin(buffer: &mut String, pinyin: Pinyin) {
    if !buffer.is_empty() && !buffer.ends_with(' ') {
        buffer.push(' ');
    }
    buffer.push_str(pinyin.plain());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_slug_parameterizes_titles() {
        assert_eq!(derive_slug("Hello, World!").expect("slug"), "hello-world");
        assert_eq!(derive_slug("Café au lait").expect("slug"), "cafe-au-lait");
        assert_eq!(
            derive_slug("Rust 基础教程").expect("slug"),
            "rust-ji-chu-jiao-cheng"
        );
    }

    #[test]
    fn punctuation_only_titles_become_untitled() {
        let slug = base_slug_for_title("!!!");
        assert!(slug.starts_with("untitled-"));
        assert_eq!(slug.len(), "untitled-".len() + 8);
        assert!(slug["untitled-".len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn first_slug_has_no_suffix() {
        let slug = SequencedSlug::next("hello".to_string(), None);
        assert_eq!(slug.suffix, 1);
        assert_eq!(slug.slug(), "hello");
    }

    #[test]
    fn later_slugs_count_up_from_the_maximum() {
        let slug = SequencedSlug::next("hello".to_string(), Some(1));
        assert_eq!(slug.slug(), "hello-2");

        let slug = SequencedSlug::next("hello".to_string(), Some(7));
        assert_eq!(slug.slug(), "hello-8");
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }
}
