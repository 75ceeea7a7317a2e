//! Data-driven per-platform constraint tables

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{ConfigError, MultipubError, Result};
use crate::types::{ContentItem, PlatformKind};

const BUILTIN_CONSTRAINTS: &str = include_str!("../../constraints/platforms.toml");

/// Shape of content, derived from its media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Video,
    Images,
    /// Text only
    Article,
}

impl ContentKind {
    pub fn of(content: &ContentItem) -> Self {
        if content.videos().next().is_some() {
            ContentKind::Video
        } else if content.images().next().is_some() {
            ContentKind::Images
        } else {
            ContentKind::Article
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Video => "video",
            ContentKind::Images => "images",
            ContentKind::Article => "article",
        }
    }
}

/// Numeric media limits; `None` means unconstrained
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MediaLimits {
    pub image_min: Option<usize>,
    pub image_max: Option<usize>,
    pub image_max_bytes: Option<u64>,
    pub image_min_width: Option<u32>,
    pub image_min_height: Option<u32>,
    pub video_max_bytes: Option<u64>,
    pub video_min_secs: Option<f64>,
    pub video_max_secs: Option<f64>,
    pub video_min_width: Option<u32>,
    pub video_min_height: Option<u32>,
}

impl MediaLimits {
    /// Values set in `overrides` win over `self`
    pub fn merged(&self, overrides: &MediaLimits) -> MediaLimits {
        MediaLimits {
            image_min: overrides.image_min.or(self.image_min),
            image_max: overrides.image_max.or(self.image_max),
            image_max_bytes: overrides.image_max_bytes.or(self.image_max_bytes),
            image_min_width: overrides.image_min_width.or(self.image_min_width),
            image_min_height: overrides.image_min_height.or(self.image_min_height),
            video_max_bytes: overrides.video_max_bytes.or(self.video_max_bytes),
            video_min_secs: overrides.video_min_secs.or(self.video_min_secs),
            video_max_secs: overrides.video_max_secs.or(self.video_max_secs),
            video_min_width: overrides.video_min_width.or(self.video_min_width),
            video_min_height: overrides.video_min_height.or(self.video_min_height),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubCategorySpec {
    pub name: String,
    #[serde(default)]
    pub limits: MediaLimits,
    #[serde(default)]
    pub forbid_description: bool,
    #[serde(default)]
    pub forbid_images: bool,
    #[serde(default)]
    pub forbid_video: bool,
    /// Width:height images should have; a mismatch only warns
    #[serde(default)]
    pub recommended_aspect_ratio: Option<[u32; 2]>,
}

/// A field that becomes required when an option has a given value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConditionalRequirement {
    pub option: String,
    pub equals: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformConstraintSpec {
    pub display_name: String,
    /// `None` when the platform has no title field
    #[serde(default)]
    pub title_max: Option<usize>,
    pub description_max: usize,
    pub topic_max: usize,
    /// `title`, `description`, `topics`, `media`, or the name of a content option
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub required_when: Vec<ConditionalRequirement>,
    pub accepts: Vec<ContentKind>,
    #[serde(default)]
    pub media: MediaLimits,
    #[serde(default)]
    pub sub_categories: Vec<SubCategorySpec>,
}

impl PlatformConstraintSpec {
    pub fn sub_category(&self, name: &str) -> Option<&SubCategorySpec> {
        self.sub_categories.iter().find(|s| s.name == name)
    }

    /// Base media limits with the sub-category's overrides applied
    pub fn effective_limits(&self, sub_category: Option<&SubCategorySpec>) -> MediaLimits {
        match sub_category {
            Some(sub) => self.media.merged(&sub.limits),
            None => self.media.clone(),
        }
    }
}

#[derive(Deserialize)]
struct RawTable {
    platforms: BTreeMap<String, PlatformConstraintSpec>,
}

/// Constraint specs for every known platform, loaded once and never mutated
#[derive(Debug, Clone)]
pub struct ConstraintTable {
    platforms: HashMap<PlatformKind, PlatformConstraintSpec>,
}

impl ConstraintTable {
    /// The table compiled into the library
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_CONSTRAINTS)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawTable = toml::from_str(content).map_err(ConfigError::ParseError)?;
        let mut platforms = HashMap::with_capacity(raw.platforms.len());
        for (name, spec) in raw.platforms {
            let kind: PlatformKind = name.parse().map_err(|_| {
                MultipubError::from(ConfigError::InvalidValue {
                    field: format!("platforms.{}", name),
                    reason: "unknown platform".to_string(),
                })
            })?;
            platforms.insert(kind, spec);
        }
        Ok(Self { platforms })
    }

    /// Built-in table, or the file named by `[constraints] path`
    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        match &config.constraints.path {
            Some(path) => {
                let expanded = shellexpand::tilde(path).to_string();
                Self::from_path(Path::new(&expanded))
            }
            None => Self::builtin(),
        }
    }

    pub fn get(&self, platform: PlatformKind) -> Option<&PlatformConstraintSpec> {
        self.platforms.get(&platform)
    }

    pub fn platforms(&self) -> impl Iterator<Item = PlatformKind> + '_ {
        self.platforms.keys().copied()
    }
}
