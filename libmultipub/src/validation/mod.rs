//! Content validation against per-platform constraint tables
//!
//! One generic evaluator walks a fixed checklist over a [`PlatformConstraintSpec`]:
//!
//! 1. sub-category exists for the platform
//! 2. required fields (including option-conditional ones)
//! 3. title and description length, counted in characters
//! 4. media kind, image count/size/resolution, video count/duration/size/resolution
//! 5. sub-category prohibitions
//! 6. topic count and topic format
//!
//! The first violation is returned as the blocking error. Warnings come from a
//! separate pass and never block.

pub mod constraints;
pub mod topics;

use serde::Serialize;
use thiserror::Error;

use crate::types::{ContentItem, PlatformKind};

pub use constraints::{
    ConditionalRequirement, ConstraintTable, ContentKind, MediaLimits, PlatformConstraintSpec,
    SubCategorySpec,
};

/// Tolerance for the recommended aspect ratio check
const ASPECT_RATIO_TOLERANCE: f64 = 0.05;

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("{platform} is not a supported platform")]
    UnsupportedPlatform { platform: String },

    #[error("{platform} has no content category '{sub_category}'")]
    UnknownSubCategory {
        platform: String,
        sub_category: String,
    },

    #[error("{platform} requires {field}")]
    MissingField { platform: String, field: String },

    #[error("{platform} titles are limited to {max} characters (got {actual})")]
    TitleTooLong {
        platform: String,
        max: usize,
        actual: usize,
    },

    #[error("{platform} descriptions are limited to {max} characters (got {actual})")]
    DescriptionTooLong {
        platform: String,
        max: usize,
        actual: usize,
    },

    #[error("{platform} does not accept {kind} content")]
    UnsupportedContentKind { platform: String, kind: String },

    #[error("{platform} needs at least {min} images (got {actual})")]
    TooFewImages {
        platform: String,
        min: usize,
        actual: usize,
    },

    #[error("{platform} accepts at most {max} images (got {actual})")]
    TooManyImages {
        platform: String,
        max: usize,
        actual: usize,
    },

    #[error("{platform} images must be at most {max_bytes} bytes (got {actual})")]
    ImageTooLarge {
        platform: String,
        max_bytes: u64,
        actual: u64,
    },

    #[error("{platform} images must be at least {min_width}x{min_height} (got {width}x{height})")]
    ImageResolutionTooLow {
        platform: String,
        min_width: u32,
        min_height: u32,
        width: u32,
        height: u32,
    },

    #[error("{platform} accepts a single video (got {count})")]
    MultipleVideos { platform: String, count: usize },

    #[error("Video duration must be positive for {platform}")]
    InvalidVideoDuration { platform: String },

    #[error("{platform} videos must be at least {min_secs}s long (got {actual}s)")]
    VideoTooShort {
        platform: String,
        min_secs: f64,
        actual: f64,
    },

    #[error("{platform} videos must be at most {max_secs}s long (got {actual}s)")]
    VideoTooLong {
        platform: String,
        max_secs: f64,
        actual: f64,
    },

    #[error("{platform} videos must be at most {max_bytes} bytes (got {actual})")]
    VideoTooLarge {
        platform: String,
        max_bytes: u64,
        actual: u64,
    },

    #[error("{platform} videos must be at least {min_width}x{min_height} (got {width}x{height})")]
    VideoResolutionTooLow {
        platform: String,
        min_width: u32,
        min_height: u32,
        width: u32,
        height: u32,
    },

    #[error("{platform} {sub_category} does not allow a description")]
    DescriptionForbidden {
        platform: String,
        sub_category: String,
    },

    #[error("{platform} {sub_category} does not allow images")]
    ImagesForbidden {
        platform: String,
        sub_category: String,
    },

    #[error("{platform} {sub_category} does not allow video")]
    VideoForbidden {
        platform: String,
        sub_category: String,
    },

    #[error("{platform} allows at most {max} topics (got {actual})")]
    TooManyTopics {
        platform: String,
        max: usize,
        actual: usize,
    },

    #[error("Topics must be separated by a space: '{word}'")]
    GluedTopics { platform: String, word: String },

    #[error("Invalid topic '{topic}': topics cannot contain '#' or whitespace")]
    InvalidTopic { platform: String, topic: String },
}

/// Non-blocking findings
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationWarning {
    RecommendedAspectRatio {
        platform: String,
        media_id: String,
        expected: [u32; 2],
        width: u32,
        height: u32,
    },
    TitleIgnored {
        platform: String,
    },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::RecommendedAspectRatio {
                platform,
                expected,
                width,
                height,
                ..
            } => write!(
                f,
                "{} recommends a {}:{} aspect ratio (image is {}x{})",
                platform, expected[0], expected[1], width, height
            ),
            ValidationWarning::TitleIgnored { platform } => {
                write!(f, "{} has no title field; the title will not be published", platform)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub blocking: Option<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn is_blocked(&self) -> bool {
        self.blocking.is_some()
    }
}

impl ConstraintTable {
    /// Validate content for one platform and optional sub-category
    pub fn validate(
        &self,
        content: &ContentItem,
        platform: PlatformKind,
        sub_category: Option<&str>,
    ) -> ValidationReport {
        match self.get(platform) {
            Some(spec) => validate(content, spec, sub_category),
            None => ValidationReport {
                blocking: Some(ValidationError::UnsupportedPlatform {
                    platform: platform.to_string(),
                }),
                warnings: Vec::new(),
            },
        }
    }
}

/// Validate content against a single platform spec
pub fn validate(
    content: &ContentItem,
    spec: &PlatformConstraintSpec,
    sub_category: Option<&str>,
) -> ValidationReport {
    let sub = match sub_category {
        Some(name) => match spec.sub_category(name) {
            Some(sub) => Some(sub),
            None => {
                return ValidationReport {
                    blocking: Some(ValidationError::UnknownSubCategory {
                        platform: spec.display_name.clone(),
                        sub_category: name.to_string(),
                    }),
                    warnings: Vec::new(),
                }
            }
        },
        None => None,
    };

    let checker = Checker { content, spec, sub };
    ValidationReport {
        blocking: checker.first_violation().err(),
        warnings: checker.warnings(),
    }
}

struct Checker<'a> {
    content: &'a ContentItem,
    spec: &'a PlatformConstraintSpec,
    sub: Option<&'a SubCategorySpec>,
}

type Check = Result<(), ValidationError>;

impl<'a> Checker<'a> {
    fn platform(&self) -> String {
        self.spec.display_name.clone()
    }

    fn first_violation(&self) -> Check {
        self.required_fields()?;
        self.lengths()?;
        self.media()?;
        self.prohibitions()?;
        self.topics()
    }

    fn has_field(&self, field: &str) -> bool {
        match field {
            "title" => non_blank(self.content.title.as_deref()),
            "description" => non_blank(self.content.description.as_deref()),
            "topics" => !topics::collect(&self.content.topics, self.content.description.as_deref())
                .is_empty(),
            "media" => !self.content.media.is_empty(),
            option => non_blank(self.content.options.get(option).map(String::as_str)),
        }
    }

    fn required_fields(&self) -> Check {
        let conditional = self.spec.required_when.iter().filter(|rule| {
            self.content.options.get(&rule.option).map(String::as_str) == Some(rule.equals.as_str())
        });
        let fields = self
            .spec
            .required_fields
            .iter()
            .chain(conditional.map(|rule| &rule.field));

        for field in fields {
            if !self.has_field(field) {
                return Err(ValidationError::MissingField {
                    platform: self.platform(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn lengths(&self) -> Check {
        if let (Some(max), Some(title)) = (self.spec.title_max, self.content.title.as_deref()) {
            let actual = title.chars().count();
            if actual > max {
                return Err(ValidationError::TitleTooLong {
                    platform: self.platform(),
                    max,
                    actual,
                });
            }
        }
        if let Some(description) = self.content.description.as_deref() {
            let actual = description.chars().count();
            if actual > self.spec.description_max {
                return Err(ValidationError::DescriptionTooLong {
                    platform: self.platform(),
                    max: self.spec.description_max,
                    actual,
                });
            }
        }
        Ok(())
    }

    fn media(&self) -> Check {
        let kind = ContentKind::of(self.content);
        if !self.spec.accepts.contains(&kind) {
            return Err(ValidationError::UnsupportedContentKind {
                platform: self.platform(),
                kind: kind.as_str().to_string(),
            });
        }

        let limits = self.spec.effective_limits(self.sub);
        self.images(&limits)?;
        self.video(&limits)
    }

    fn images(&self, limits: &MediaLimits) -> Check {
        let images: Vec<_> = self.content.images().collect();
        if images.is_empty() {
            return Ok(());
        }

        if let Some(min) = limits.image_min {
            if images.len() < min {
                return Err(ValidationError::TooFewImages {
                    platform: self.platform(),
                    min,
                    actual: images.len(),
                });
            }
        }
        if let Some(max) = limits.image_max {
            if images.len() > max {
                return Err(ValidationError::TooManyImages {
                    platform: self.platform(),
                    max,
                    actual: images.len(),
                });
            }
        }

        for image in images {
            if let Some(max_bytes) = limits.image_max_bytes {
                if image.size_bytes > max_bytes {
                    return Err(ValidationError::ImageTooLarge {
                        platform: self.platform(),
                        max_bytes,
                        actual: image.size_bytes,
                    });
                }
            }
            let (min_width, min_height) = (
                limits.image_min_width.unwrap_or(0),
                limits.image_min_height.unwrap_or(0),
            );
            if image.width < min_width || image.height < min_height {
                return Err(ValidationError::ImageResolutionTooLow {
                    platform: self.platform(),
                    min_width,
                    min_height,
                    width: image.width,
                    height: image.height,
                });
            }
        }
        Ok(())
    }

    fn video(&self, limits: &MediaLimits) -> Check {
        let videos: Vec<_> = self.content.videos().collect();
        if videos.len() > 1 {
            return Err(ValidationError::MultipleVideos {
                platform: self.platform(),
                count: videos.len(),
            });
        }
        let Some(video) = videos.first() else {
            return Ok(());
        };

        let duration = match video.duration_secs {
            Some(d) if d > 0.0 && d.is_finite() => d,
            _ => {
                return Err(ValidationError::InvalidVideoDuration {
                    platform: self.platform(),
                })
            }
        };
        if let Some(min_secs) = limits.video_min_secs {
            if duration < min_secs {
                return Err(ValidationError::VideoTooShort {
                    platform: self.platform(),
                    min_secs,
                    actual: duration,
                });
            }
        }
        if let Some(max_secs) = limits.video_max_secs {
            if duration > max_secs {
                return Err(ValidationError::VideoTooLong {
                    platform: self.platform(),
                    max_secs,
                    actual: duration,
                });
            }
        }
        if let Some(max_bytes) = limits.video_max_bytes {
            if video.size_bytes > max_bytes {
                return Err(ValidationError::VideoTooLarge {
                    platform: self.platform(),
                    max_bytes,
                    actual: video.size_bytes,
                });
            }
        }
        let (min_width, min_height) = (
            limits.video_min_width.unwrap_or(0),
            limits.video_min_height.unwrap_or(0),
        );
        if video.width < min_width || video.height < min_height {
            return Err(ValidationError::VideoResolutionTooLow {
                platform: self.platform(),
                min_width,
                min_height,
                width: video.width,
                height: video.height,
            });
        }
        Ok(())
    }

    fn prohibitions(&self) -> Check {
        let Some(sub) = self.sub else {
            return Ok(());
        };
        let sub_category = sub.name.clone();

        if sub.forbid_description && non_blank(self.content.description.as_deref()) {
            return Err(ValidationError::DescriptionForbidden {
                platform: self.platform(),
                sub_category,
            });
        }
        if sub.forbid_images && self.content.images().next().is_some() {
            return Err(ValidationError::ImagesForbidden {
                platform: self.platform(),
                sub_category,
            });
        }
        if sub.forbid_video && self.content.videos().next().is_some() {
            return Err(ValidationError::VideoForbidden {
                platform: self.platform(),
                sub_category,
            });
        }
        Ok(())
    }

    fn topics(&self) -> Check {
        let description = self.content.description.as_deref();

        if let Some(word) = description.and_then(topics::find_glued) {
            return Err(ValidationError::GluedTopics {
                platform: self.platform(),
                word: word.to_string(),
            });
        }
        if let Some(topic) = self
            .content
            .topics
            .iter()
            .find(|t| !topics::is_valid_explicit(t))
        {
            return Err(ValidationError::InvalidTopic {
                platform: self.platform(),
                topic: topic.clone(),
            });
        }

        let actual = topics::collect(&self.content.topics, description).len();
        if actual > self.spec.topic_max {
            return Err(ValidationError::TooManyTopics {
                platform: self.platform(),
                max: self.spec.topic_max,
                actual,
            });
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        if self.spec.title_max.is_none() && non_blank(self.content.title.as_deref()) {
            warnings.push(ValidationWarning::TitleIgnored {
                platform: self.platform(),
            });
        }

        if let Some([w, h]) = self.sub.and_then(|s| s.recommended_aspect_ratio) {
            let expected = f64::from(w) / f64::from(h);
            for image in self.content.images() {
                if image.height == 0 {
                    continue;
                }
                let actual = f64::from(image.width) / f64::from(image.height);
                if ((actual - expected) / expected).abs() > ASPECT_RATIO_TOLERANCE {
                    warnings.push(ValidationWarning::RecommendedAspectRatio {
                        platform: self.platform(),
                        media_id: image.id.clone(),
                        expected: [w, h],
                        width: image.width,
                        height: image.height,
                    });
                }
            }
        }

        warnings
    }
}

fn non_blank(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}
