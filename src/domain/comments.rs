//! Comment rules that hold regardless of transport: content limits, who may
//! edit or delete, and how an author is presented.

use std::fmt;
use std::str::FromStr;

use mangasync_api_types::{Comment, CommentAuthor};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::error::DomainError;

/// Maximum comment length in characters.
pub const MAX_COMMENT_LENGTH: usize = 1000;

const DEFAULT_INITIALS: &str = "User";

/// Platform roles, ordered by privilege.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Staff,
    Admin,
    Owner,
}

impl Role {
    pub fn is_staff_or_above(self) -> bool {
        self >= Role::Staff
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Staff => "staff",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "staff" => Ok(Role::Staff),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(DomainError::validation(format!("unknown role `{other}`"))),
        }
    }
}

/// The signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: String,
    pub username: Option<String>,
    pub role: Role,
    pub profile_picture: Option<String>,
    pub profile_image_url: Option<String>,
}

impl Viewer {
    pub fn new(id: impl Into<String>, username: Option<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            username,
            role,
            profile_picture: None,
            profile_image_url: None,
        }
    }

    /// The author record used for optimistic comments.
    pub fn as_author(&self) -> CommentAuthor {
        CommentAuthor {
            id: self.id.clone(),
            username: self.username.clone(),
            profile_picture: self.profile_picture.clone(),
            profile_image_url: self.profile_image_url.clone(),
        }
    }
}

/// Only the author may edit.
pub fn can_edit(viewer: Option<&Viewer>, comment: &Comment) -> bool {
    viewer.is_some_and(|viewer| viewer.id == comment.user_id)
}

/// The author or anyone staff-or-above may delete.
pub fn can_delete(viewer: Option<&Viewer>, comment: &Comment) -> bool {
    viewer.is_some_and(|viewer| viewer.id == comment.user_id || viewer.role.is_staff_or_above())
}

/// Trim submitted content, rejecting empty or whitespace-only input.
pub fn validate_content(content: &str) -> Result<String, DomainError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("comment content must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Avatar URL, preferring the uploaded image over the legacy picture field.
pub fn profile_image(author: &CommentAuthor) -> Option<&str> {
    author
        .profile_image_url
        .as_deref()
        .filter(|url| !url.is_empty())
        .or_else(|| author.profile_picture.as_deref().filter(|url| !url.is_empty()))
}

/// Avatar fallback text: the first two characters of the username, upper-cased.
pub fn initials(username: Option<&str>) -> String {
    username
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_INITIALS)
        .chars()
        .take(2)
        .collect::<String>()
        .to_uppercase()
}

/// A comment counts as edited once its timestamps diverge.
pub fn is_edited(comment: &Comment) -> bool {
    comment.updated_at.is_some() && comment.updated_at != comment.created_at
}

/// Relative age such as "5 minutes ago".
///
/// A missing timestamp reads "Just now" and an unparsable one "Recently".
pub fn format_timestamp(timestamp: Option<&str>, now: OffsetDateTime) -> String {
    let Some(raw) = timestamp else {
        return "Just now".to_string();
    };
    let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) else {
        return "Recently".to_string();
    };

    let elapsed = now - at;
    let future = elapsed.is_negative();
    let seconds = elapsed.whole_seconds().unsigned_abs();
    let minutes = (seconds + 30) / 60;
    let hours = (minutes + 30) / 60;
    let days = (hours + 12) / 24;

    let distance = if minutes == 0 {
        "less than a minute".to_string()
    } else if minutes < 45 {
        plural(minutes, "minute")
    } else if hours < 24 {
        format!("about {}", plural(hours.max(1), "hour"))
    } else if days < 30 {
        plural(days, "day")
    } else if days < 365 {
        plural(days / 30, "month")
    } else {
        format!("about {}", plural(days / 365, "year"))
    };

    if future {
        format!("in {distance}")
    } else {
        format!("{distance} ago")
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

/// Text being typed into a comment box.
///
/// Input is capped at [`MAX_COMMENT_LENGTH`] characters as it is entered, so
/// a draft never holds more than can be submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDraft {
    content: String,
}

impl CommentDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, input: &str) {
        self.content = input.chars().take(MAX_COMMENT_LENGTH).collect();
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    pub fn remaining(&self) -> usize {
        MAX_COMMENT_LENGTH - self.char_count()
    }

    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }
}
