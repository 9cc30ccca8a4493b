//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::{ImageVariant, PostKind};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlogRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subdomain: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub favicon_emoji: Option<String>,
    pub custom_domain: Option<String>,
    pub theme: String,
    pub post_footer_markdown: Option<String>,
    pub post_footer_html: Option<String>,
    pub no_index: bool,
    pub primary: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl BlogRecord {
    /// Public host for the blog: the custom domain when set, otherwise the hosted subdomain.
    pub fn domain(&self, root_domain: &str) -> String {
        match self.custom_domain.as_deref() {
            Some(custom) if !custom.is_empty() => custom.to_string(),
            _ => format!("{}.{}", self.subdomain, root_domain),
        }
    }

    pub fn uses_custom_domain(&self) -> bool {
        self.custom_domain
            .as_deref()
            .is_some_and(|domain| !domain.is_empty())
    }

    pub fn should_redirect_to_custom_domain(&self, current_host: &str) -> bool {
        match self.custom_domain.as_deref() {
            Some(custom) if !custom.is_empty() => custom != current_host,
            _ => false,
        }
    }

    /// Title shown in chrome and feeds, falling back to the subdomain.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.subdomain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub blog_id: Uuid,
    pub author_id: Uuid,
    pub kind: PostKind,
    pub title: String,
    pub slug: String,
    #[serde(skip_serializing)]
    pub base_slug: String,
    #[serde(skip_serializing)]
    pub slug_suffix: i32,
    pub body_markdown: Option<String>,
    pub body_html: Option<String>,
    pub meta_description: Option<String>,
    pub published: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub featured: bool,
    pub has_mermaid_diagrams: bool,
    pub tag_list: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PostRecord {
    pub fn is_page(&self) -> bool {
        self.kind == PostKind::Page
    }

    pub fn draft(&self) -> bool {
        !self.published
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub id: Uuid,
    pub blog_id: Uuid,
    pub name: String,
    pub slug: String,
}

/// Tag with the number of published posts carrying it, plus the newest of their update times.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagWithCount {
    pub tag: TagRecord,
    pub posts_count: i64,
    pub last_updated_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl UserTokenRecord {
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > now)
    }
}

/// Flags and facts attached to an uploaded blob. Unknown keys supplied by clients are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobMetadata {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub processed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub processing_queued: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub variant_thumb: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub variant_medium: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub variant_large: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlobMetadata {
    pub fn has_variant(&self, variant: ImageVariant) -> bool {
        match variant {
            ImageVariant::Thumb => self.variant_thumb,
            ImageVariant::Medium => self.variant_medium,
            ImageVariant::Large => self.variant_large,
        }
    }

    pub fn mark_variant(&mut self, variant: ImageVariant) {
        match variant {
            ImageVariant::Thumb => self.variant_thumb = true,
            ImageVariant::Medium => self.variant_medium = true,
            ImageVariant::Large => self.variant_large = true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlobRecord {
    pub id: Uuid,
    pub key: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub byte_size: i64,
    pub checksum: Option<String>,
    pub metadata: BlobMetadata,
    pub service_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl BlobRecord {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|content_type| content_type.starts_with("image/"))
    }

    pub fn is_processable(&self) -> bool {
        self.is_image() && self.byte_size > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog(custom_domain: Option<&str>) -> BlogRecord {
        let now = OffsetDateTime::now_utc();
        BlogRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            subdomain: "lindsey".to_string(),
            title: None,
            meta_description: None,
            favicon_emoji: None,
            custom_domain: custom_domain.map(str::to_string),
            theme: "light".to_string(),
            post_footer_markdown: None,
            post_footer_html: None,
            no_index: false,
            primary: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn domain_prefers_custom_domain() {
        assert_eq!(blog(None).domain("willow.camp"), "lindsey.willow.camp");
        assert_eq!(
            blog(Some("blog.example.com")).domain("willow.camp"),
            "blog.example.com"
        );
    }

    #[test]
    fn redirect_needed_only_when_host_differs_from_custom_domain() {
        let hosted = blog(Some("blog.example.com"));
        assert!(hosted.should_redirect_to_custom_domain("lindsey.willow.camp"));
        assert!(!hosted.should_redirect_to_custom_domain("blog.example.com"));
        assert!(!blog(None).should_redirect_to_custom_domain("lindsey.willow.camp"));
    }

    #[test]
    fn token_without_expiry_stays_active() {
        let now = OffsetDateTime::now_utc();
        let mut token = UserTokenRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "cli".to_string(),
            token: "0".repeat(32),
            expires_at: None,
            created_at: now,
        };
        assert!(token.is_active(now));

        token.expires_at = Some(now - time::Duration::minutes(1));
        assert!(!token.is_active(now));
    }

    #[test]
    fn blob_metadata_keeps_client_keys() {
        let raw = serde_json::json!({ "identified": true, "processed": true });
        let metadata: BlobMetadata = serde_json::from_value(raw).expect("metadata");
        assert!(metadata.processed);
        assert_eq!(metadata.extra.get("identified"), Some(&Value::Bool(true)));

        let back = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(back, serde_json::json!({ "identified": true, "processed": true }));
    }
}
