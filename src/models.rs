use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Always Postgres backed in production; the inmem backend mirrors these rows.
pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Category {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub topic_count: i64,
    pub post_count: i64,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCategory {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Topic {
    pub id: Id,
    pub category_id: Id,
    pub user_id: Id,
    pub title: String,
    pub slug: String,
    pub is_locked: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by_user_id: Option<Id>,
    pub first_post_id: Option<Id>,
    pub last_post_id: Option<Id>,
    pub post_count: i64, // non-deleted posts only
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_user_id: Option<Id>,
}

/// Input for the atomic topic + first post insert.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTopic {
    pub category_id: Id,
    pub user_id: Id,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub topic_id: Id,
    pub user_id: Id,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_user_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub topic_id: Id,
    pub user_id: Id,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Business {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub review_count: i64, // approved reviews only
    pub rating_sum: i64,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewBusiness {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "review_status", rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Review {
    pub id: Id,
    pub business_id: Id,
    pub user_id: Id,
    pub rating: i16, // 1..=5
    pub title: String,
    pub comment: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub moderated_by_user_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewReview {
    pub business_id: Id,
    pub user_id: Id,
    pub rating: i16,
    pub title: String,
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Approve,
    Reject,
}

impl ModerationAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Result of the topic + first post transaction.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TopicCreated {
    pub topic: Topic,
    pub first_post: Post,
}

/// What a post soft-delete did, reported back in the response envelope.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PostDeleteOutcome {
    pub post_id: Id,
    pub is_first_post: bool,
    pub topic_deleted: bool,
    pub topic_post_count: i64,
    pub topic_last_post_id: Option<Id>,
}

const SLUG_MAX: usize = 60;

/// Lowercased, dash-separated slug. Conflict suffixing is the repository's job.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true; // suppress leading dash
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.len() >= SLUG_MAX {
            break;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("topic");
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust & Forums 101  "), "rust-forums-101");
    }

    #[test]
    fn slugify_degenerate_input_falls_back() {
        assert_eq!(slugify("!!!"), "topic");
        assert_eq!(slugify(""), "topic");
    }

    #[test]
    fn slugify_truncates() {
        let long = "a".repeat(200);
        assert!(slugify(&long).len() <= SLUG_MAX);
    }

    #[test]
    fn moderation_action_parse() {
        assert_eq!(ModerationAction::parse("approve"), Some(ModerationAction::Approve));
        assert_eq!(ModerationAction::parse("reject"), Some(ModerationAction::Reject));
        assert_eq!(ModerationAction::parse("publish"), None);
    }
}
