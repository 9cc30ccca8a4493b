//! Shared domain enumerations aligned with persisted columns.

use serde::{Deserialize, Serialize};

/// Posts and pages share one table; the kind column tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Post,
    Page,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Post => "post",
            PostKind::Page => "page",
        }
    }
}

impl TryFrom<&str> for PostKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "post" => Ok(PostKind::Post),
            "page" => Ok(PostKind::Page),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ProcessBlobAfterCreation,
    ImageProcessing,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::ProcessBlobAfterCreation => "process_blob_after_creation",
            JobType::ImageProcessing => "image_processing",
        }
    }
}

/// Named resize targets produced for processed images, keyed by their longest edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageVariant {
    Thumb,
    Medium,
    Large,
}

impl ImageVariant {
    pub const ALL: [ImageVariant; 3] = [ImageVariant::Thumb, ImageVariant::Medium, ImageVariant::Large];

    pub fn as_str(self) -> &'static str {
        match self {
            ImageVariant::Thumb => "thumb",
            ImageVariant::Medium => "medium",
            ImageVariant::Large => "large",
        }
    }

    pub fn max_dimension(self) -> u32 {
        match self {
            ImageVariant::Thumb => 200,
            ImageVariant::Medium => 800,
            ImageVariant::Large => 1600,
        }
    }

    pub fn metadata_key(self) -> &'static str {
        match self {
            ImageVariant::Thumb => "variant_thumb",
            ImageVariant::Medium => "variant_medium",
            ImageVariant::Large => "variant_large",
        }
    }
}
