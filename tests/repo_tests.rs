#![cfg(feature = "inmem-store")]

use agora::models::{NewBusiness, NewCategory, NewPost, NewReview, NewTopic, ModerationAction, ReviewStatus};
use agora::repo::inmem::InMemRepo;
use agora::repo::{CategoryRepo, DirectoryRepo, PostRepo, RepoError, TopicRepo};
use serial_test::serial;

/// Fresh, isolated repository per test run.
fn repo() -> InMemRepo {
    std::env::set_var("AGORA_DATA_DIR", tempfile::tempdir().unwrap().into_path());
    InMemRepo::new()
}

fn new_topic(category_id: i64, user_id: i64) -> NewTopic {
    NewTopic {
        category_id,
        user_id,
        title: "Best pizza downtown".into(),
        content: "Looking for recommendations".into(),
    }
}

#[tokio::test]
#[serial]
async fn category_create_and_name_conflict() {
    let r = repo();
    assert!(r.list_categories(false).await.unwrap().is_empty());

    let c = r.create_category(NewCategory { name: "Local Eats".into() }).await.unwrap();
    assert_eq!(c.slug, "local-eats");
    assert_eq!(c.topic_count, 0);

    let err = r.create_category(NewCategory { name: "local eats".into() }).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
#[serial]
async fn topic_create_sets_aggregates() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();

    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    assert_eq!(created.topic.post_count, 1);
    assert_eq!(created.topic.first_post_id, Some(created.first_post.id));
    assert_eq!(created.topic.last_post_id, Some(created.first_post.id));
    assert_eq!(created.first_post.topic_id, created.topic.id);

    let c = r.get_category(c.id).await.unwrap();
    assert_eq!(c.topic_count, 1);
    assert_eq!(c.post_count, 1);
}

#[tokio::test]
#[serial]
async fn topic_create_in_missing_category_fails() {
    let r = repo();
    let err = r.create_topic(new_topic(999, 7)).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
#[serial]
async fn topic_slugs_stay_unique() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let a = r.create_topic(new_topic(c.id, 1)).await.unwrap();
    let b = r.create_topic(new_topic(c.id, 2)).await.unwrap();
    assert_ne!(a.topic.slug, b.topic.slug);
    assert!(b.topic.slug.starts_with("best-pizza-downtown"));
}

#[tokio::test]
#[serial]
async fn deleting_first_post_cascades_to_topic() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    let first = created.first_post.id;
    r.create_post(NewPost { topic_id: created.topic.id, user_id: 8, content: "reply".into() })
        .await
        .unwrap();

    let outcome = r.soft_delete_post(first, 7).await.unwrap();
    assert!(outcome.is_first_post);
    assert!(outcome.topic_deleted);

    let topic = r.get_topic(created.topic.id).await.unwrap();
    assert!(topic.deleted_at.is_some());
    assert_eq!(topic.deleted_by_user_id, Some(7));

    // The topic took its posts with it out of the category aggregates.
    let c = r.get_category(c.id).await.unwrap();
    assert_eq!(c.topic_count, 0);
    assert_eq!(c.post_count, 0);
}

#[tokio::test]
#[serial]
async fn deleting_reply_recounts_topic() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    let topic_id = created.topic.id;
    let p2 = r
        .create_post(NewPost { topic_id, user_id: 8, content: "second".into() })
        .await
        .unwrap();
    let p3 = r
        .create_post(NewPost { topic_id, user_id: 9, content: "third".into() })
        .await
        .unwrap();

    let outcome = r.soft_delete_post(p2.id, 8).await.unwrap();
    assert!(!outcome.is_first_post);
    assert!(!outcome.topic_deleted);
    assert_eq!(outcome.topic_post_count, 2);
    assert_eq!(outcome.topic_last_post_id, Some(p3.id));

    let topic = r.get_topic(topic_id).await.unwrap();
    assert!(topic.deleted_at.is_none());
    assert_eq!(topic.post_count, 2);
    assert_eq!(topic.last_post_id, Some(p3.id));
    assert_eq!(r.list_posts(topic_id, false).await.unwrap().len(), 2);

    let c = r.get_category(c.id).await.unwrap();
    assert_eq!(c.post_count, 2);
}

#[tokio::test]
#[serial]
async fn deleting_newest_reply_rolls_last_post_back() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    let topic_id = created.topic.id;
    let p2 = r
        .create_post(NewPost { topic_id, user_id: 8, content: "second".into() })
        .await
        .unwrap();

    r.soft_delete_post(p2.id, 8).await.unwrap();
    let topic = r.get_topic(topic_id).await.unwrap();
    assert_eq!(topic.last_post_id, created.topic.first_post_id);
}

#[tokio::test]
#[serial]
async fn second_delete_is_not_found_and_mutates_nothing() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    let p2 = r
        .create_post(NewPost { topic_id: created.topic.id, user_id: 8, content: "second".into() })
        .await
        .unwrap();

    r.soft_delete_post(p2.id, 8).await.unwrap();
    let before = r.get_topic(created.topic.id).await.unwrap();
    let err = r.soft_delete_post(p2.id, 8).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    let after = r.get_topic(created.topic.id).await.unwrap();
    assert_eq!(before.post_count, after.post_count);
    assert_eq!(before.last_post_id, after.last_post_id);
}

#[tokio::test]
#[serial]
async fn toggle_lock_roundtrip() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    let id = created.topic.id;

    let locked = r.toggle_topic_lock(id, 42).await.unwrap();
    assert!(locked.is_locked);
    assert!(locked.locked_at.is_some());
    assert_eq!(locked.locked_by_user_id, Some(42));

    let unlocked = r.toggle_topic_lock(id, 42).await.unwrap();
    assert!(!unlocked.is_locked);
    assert!(unlocked.locked_at.is_none());
    assert!(unlocked.locked_by_user_id.is_none());
}

#[tokio::test]
#[serial]
async fn toggle_lock_on_deleted_topic_is_not_found() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    r.soft_delete_topic(created.topic.id, 7).await.unwrap();
    let err = r.toggle_topic_lock(created.topic.id, 42).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
#[serial]
async fn deleted_topics_leave_listings() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();

    r.soft_delete_topic(created.topic.id, 7).await.unwrap();
    let (visible, total) = r.list_topics(c.id, false, 1, 20).await.unwrap();
    assert!(visible.is_empty());
    assert_eq!(total, 0);

    let (all, total) = r.list_topics(c.id, true, 1, 20).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(total, 1);
    assert!(all[0].deleted_at.is_some());

    // Second delete of the same topic is a 404-shaped no-op.
    let err = r.soft_delete_topic(created.topic.id, 7).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
    let c = r.get_category(c.id).await.unwrap();
    assert_eq!(c.topic_count, 0);
}

#[tokio::test]
#[serial]
async fn update_post_content_stamps_updated_at() {
    let r = repo();
    let c = r.create_category(NewCategory { name: "General".into() }).await.unwrap();
    let created = r.create_topic(new_topic(c.id, 7)).await.unwrap();
    let post = r
        .update_post_content(created.first_post.id, "edited".into())
        .await
        .unwrap();
    assert_eq!(post.content, "edited");
    assert!(post.updated_at.is_some());
}

#[tokio::test]
#[serial]
async fn review_moderation_flow() {
    let r = repo();
    let b = r.create_business(NewBusiness { name: "Corner Bakery".into() }).await.unwrap();
    let review = r
        .create_review(NewReview {
            business_id: b.id,
            user_id: 5,
            rating: 4,
            title: "Great bread".into(),
            comment: "Sourdough worth the queue".into(),
        })
        .await
        .unwrap();
    assert_eq!(review.status, ReviewStatus::Pending);

    // one live review per user and business
    let err = r
        .create_review(NewReview {
            business_id: b.id,
            user_id: 5,
            rating: 2,
            title: "Changed my mind".into(),
            comment: "Second thoughts".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let approved = r.moderate_review(review.id, ModerationAction::Approve, 99).await.unwrap();
    assert_eq!(approved.status, ReviewStatus::Approved);
    assert_eq!(approved.moderated_by_user_id, Some(99));

    let b = r.get_business(b.id).await.unwrap();
    assert_eq!(b.review_count, 1);
    assert_eq!(b.rating_sum, 4);

    // approved reviews never transition again
    let err = r.moderate_review(review.id, ModerationAction::Reject, 99).await.unwrap_err();
    assert!(matches!(err, RepoError::InvalidState(_)));
}

#[tokio::test]
#[serial]
async fn rejected_review_can_be_resubmitted() {
    let r = repo();
    let b = r.create_business(NewBusiness { name: "Corner Bakery".into() }).await.unwrap();
    let review = r
        .create_review(NewReview {
            business_id: b.id,
            user_id: 5,
            rating: 1,
            title: "Spam".into(),
            comment: "buy followers".into(),
        })
        .await
        .unwrap();
    r.moderate_review(review.id, ModerationAction::Reject, 99).await.unwrap();

    // rejection keeps the aggregates untouched
    let b2 = r.get_business(b.id).await.unwrap();
    assert_eq!(b2.review_count, 0);
    assert_eq!(b2.rating_sum, 0);

    assert!(r
        .create_review(NewReview {
            business_id: b.id,
            user_id: 5,
            rating: 5,
            title: "Real review".into(),
            comment: "Actually pretty good".into(),
        })
        .await
        .is_ok());
}

#[tokio::test]
#[serial]
async fn review_listing_filters_by_status_and_paginates() {
    let r = repo();
    let b = r.create_business(NewBusiness { name: "Corner Bakery".into() }).await.unwrap();
    for user_id in 1..=5 {
        let review = r
            .create_review(NewReview {
                business_id: b.id,
                user_id,
                rating: 5,
                title: format!("review {user_id}"),
                comment: "good enough to repeat".into(),
            })
            .await
            .unwrap();
        r.moderate_review(review.id, ModerationAction::Approve, 99).await.unwrap();
    }
    let (page1, total) = r.list_reviews(b.id, ReviewStatus::Approved, 1, 2).await.unwrap();
    assert_eq!(total, 5);
    assert_eq!(page1.len(), 2);
    let (page3, _) = r.list_reviews(b.id, ReviewStatus::Approved, 3, 2).await.unwrap();
    assert_eq!(page3.len(), 1);
    let (pending, total) = r.list_reviews(b.id, ReviewStatus::Pending, 1, 20).await.unwrap();
    assert!(pending.is_empty());
    assert_eq!(total, 0);
}
