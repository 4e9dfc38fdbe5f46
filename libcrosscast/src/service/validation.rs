//! Post validation
//!
//! Checks a [`NewPost`] against the configured bounds before anything is
//! persisted. Every offending field is reported, not just the first.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ValidationErrors;
use crate::types::{normalize_hashtag, NewPost, Platform};

/// Highest allowed post priority
pub const MAX_PRIORITY: u8 = 10;

/// Service for validating post requests
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use libcrosscast::config::Config;
/// use libcrosscast::service::validation::ValidationService;
/// use libcrosscast::types::{NewPost, Platform};
///
/// let service = ValidationService::new(Arc::new(Config::default()));
/// let errors = service.validate_post(&NewPost {
///     title: "".to_string(),
///     description: "Barely worn".to_string(),
///     target_platforms: vec![Platform::Facebook],
///     ..Default::default()
/// });
/// assert!(errors.has("title"));
/// ```
#[derive(Clone)]
pub struct ValidationService {
    config: Arc<Config>,
}

impl ValidationService {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Every field of `request` that violates the configured bounds
    pub fn validate_post(&self, request: &NewPost) -> ValidationErrors {
        let limits = &self.config.validation;
        let mut errors = ValidationErrors::new();

        check_text(
            &mut errors,
            "title",
            &request.title,
            limits.title_max_chars,
        );
        check_text(
            &mut errors,
            "description",
            &request.description,
            limits.description_max_chars,
        );

        if request.hashtags.len() > limits.max_hashtags {
            errors.add(
                "hashtags",
                format!("at most {} allowed, got {}", limits.max_hashtags, request.hashtags.len()),
            );
        } else if request.hashtags.iter().any(|h| normalize_hashtag(h).is_empty()) {
            errors.add("hashtags", "must not contain empty tags");
        }

        if request.images.len() > limits.max_images {
            errors.add(
                "images",
                format!("at most {} allowed, got {}", limits.max_images, request.images.len()),
            );
        } else if request.images.iter().any(|i| i.trim().is_empty()) {
            errors.add("images", "must not contain empty references");
        }

        check_platforms(&mut errors, "target_platforms", &request.target_platforms);

        for platform in request.platform_content.keys() {
            if !request.target_platforms.contains(platform) {
                errors.add(
                    "platform_content",
                    format!("override for {} which is not a target platform", platform),
                );
            }
        }
        for (platform, content) in &request.platform_content {
            if let Some(title) = &content.title {
                if title.trim().is_empty() {
                    errors.add(
                        "platform_content",
                        format!("{} title override must not be empty", platform),
                    );
                }
            }
        }

        if let Some(priority) = request.priority {
            if priority > MAX_PRIORITY {
                errors.add(
                    "priority",
                    format!("must be between 0 and {}", MAX_PRIORITY),
                );
            }
        }

        errors
    }

    /// Check a platform selection for an operation on an existing post
    ///
    /// `targets` are the post's target platforms; an empty or absent
    /// `selected` means all of them.
    pub fn resolve_platforms(
        &self,
        targets: &[Platform],
        selected: Option<&[Platform]>,
    ) -> Result<Vec<Platform>, ValidationErrors> {
        let selected = match selected {
            Some(platforms) if !platforms.is_empty() => dedup(platforms),
            _ => targets.to_vec(),
        };

        let mut errors = ValidationErrors::new();
        check_platforms(&mut errors, "platforms", &selected);
        for platform in &selected {
            if !targets.contains(platform) {
                errors.add(
                    "platforms",
                    format!("{} is not a target of this post", platform),
                );
            }
        }

        if errors.is_empty() {
            Ok(selected)
        } else {
            Err(errors)
        }
    }
}

fn check_text(errors: &mut ValidationErrors, field: &str, value: &str, max_chars: usize) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.add(field, "must not be empty");
    } else if trimmed.chars().count() > max_chars {
        errors.add(
            field,
            format!("must be at most {} characters", max_chars),
        );
    }
}

fn check_platforms(errors: &mut ValidationErrors, field: &str, platforms: &[Platform]) {
    if platforms.is_empty() {
        errors.add(field, "at least one platform is required");
        return;
    }
    let unique: BTreeSet<&Platform> = platforms.iter().collect();
    if unique.len() != platforms.len() {
        errors.add(field, "must not list a platform twice");
    }
}

/// Drop repeats, keeping first occurrence order
fn dedup(platforms: &[Platform]) -> Vec<Platform> {
    let mut seen = BTreeSet::new();
    platforms
        .iter()
        .filter(|p| seen.insert(**p))
        .copied()
        .collect()
}
