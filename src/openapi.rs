use crate::models::{
    Business, Category, NewBusiness, NewCategory, NewPost, NewReview, NewTopic, Post, Review,
    ReviewStatus, Topic,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_topics,
        crate::routes::create_topic,
        crate::routes::delete_topic,
        crate::routes::list_posts,
        crate::routes::create_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::toggle_topic_lock,
        crate::routes::list_reviews,
        crate::routes::create_review,
        crate::routes::moderate_review,
    ),
    components(schemas(
        Category, NewCategory, Topic, NewTopic, Post, NewPost,
        Business, NewBusiness, Review, NewReview, ReviewStatus
    )),
    tags(
        (name = "forums", description = "Categories, topics and posts"),
        (name = "reviews", description = "Business reviews and moderation"),
    )
)]
pub struct ApiDoc;
