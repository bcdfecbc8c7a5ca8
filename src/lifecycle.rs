use chrono::{DateTime, Utc};

use crate::models::{Id, ModerationAction, ReviewStatus};

/// Soft-delete state of any row carrying a `deleted_at` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Deleted,
}

impl Lifecycle {
    pub fn of(deleted_at: Option<DateTime<Utc>>) -> Self {
        if deleted_at.is_some() {
            Lifecycle::Deleted
        } else {
            Lifecycle::Active
        }
    }

    pub fn is_active(deleted_at: Option<DateTime<Utc>>) -> bool {
        Self::of(deleted_at) == Lifecycle::Active
    }
}

/// What deleting a post must do to its topic. Both repository backends execute
/// this plan; neither decides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDeletePlan {
    /// The target is the topic's first post: the topic is tombstoned with it.
    CascadeTopic,
    /// Ordinary post: recompute `post_count` and `last_post_id` from the
    /// remaining non-deleted posts.
    RecountTopic,
}

pub fn plan_post_delete(post_id: Id, topic_first_post_id: Option<Id>) -> PostDeletePlan {
    if topic_first_post_id == Some(post_id) {
        PostDeletePlan::CascadeTopic
    } else {
        PostDeletePlan::RecountTopic
    }
}

/// Review moderation transitions. Only `pending` moves anywhere.
pub fn review_transition(from: ReviewStatus, action: ModerationAction) -> Option<ReviewStatus> {
    match (from, action) {
        (ReviewStatus::Pending, ModerationAction::Approve) => Some(ReviewStatus::Approved),
        (ReviewStatus::Pending, ModerationAction::Reject) => Some(ReviewStatus::Rejected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_of_timestamp() {
        assert_eq!(Lifecycle::of(None), Lifecycle::Active);
        assert_eq!(Lifecycle::of(Some(Utc::now())), Lifecycle::Deleted);
        assert!(Lifecycle::is_active(None));
    }

    #[test]
    fn first_post_cascades() {
        assert_eq!(plan_post_delete(10, Some(10)), PostDeletePlan::CascadeTopic);
    }

    #[test]
    fn other_posts_recount() {
        assert_eq!(plan_post_delete(11, Some(10)), PostDeletePlan::RecountTopic);
        // Topic without a recorded first post never cascades.
        assert_eq!(plan_post_delete(11, None), PostDeletePlan::RecountTopic);
    }

    #[test]
    fn only_pending_reviews_transition() {
        use ModerationAction::*;
        use ReviewStatus::*;
        assert_eq!(review_transition(Pending, Approve), Some(Approved));
        assert_eq!(review_transition(Pending, Reject), Some(Rejected));
        assert_eq!(review_transition(Approved, Reject), None);
        assert_eq!(review_transition(Rejected, Approve), None);
    }
}
