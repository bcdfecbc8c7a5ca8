use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::auth::Identity;
use crate::authz::{authorize_mutation, MutationTarget};
use crate::csrf;
use crate::error::{success_body, ApiError};
use crate::lifecycle::Lifecycle;
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, RepoError};
use crate::validate::Validator;

pub fn config(cfg: &mut web::ServiceConfig) {
    let not_allowed = || web::route().to(method_not_allowed);
    cfg.service(
        web::scope("/api/v1")
            // Forum
            .service(
                web::resource("/forums/categories")
                    .route(web::get().to(list_categories))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/topics/list")
                    .route(web::get().to(list_topics))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/topics/create")
                    .route(web::post().to(create_topic))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/topics/delete")
                    .route(web::post().to(delete_topic))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/posts/list")
                    .route(web::get().to(list_posts))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/posts/create")
                    .route(web::post().to(create_post))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/posts/update")
                    .route(web::post().to(update_post))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/forums/posts/delete")
                    .route(web::post().to(delete_post))
                    .default_service(not_allowed()),
            )
            // Directory & reviews
            .service(
                web::resource("/businesses/list")
                    .route(web::get().to(list_businesses))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/reviews/list")
                    .route(web::get().to(list_reviews))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/reviews/create")
                    .route(web::post().to(create_review))
                    .default_service(not_allowed()),
            )
            // Coupons are not part of this service yet; the endpoint documents that.
            .service(
                web::resource("/coupons/claim")
                    .route(web::post().to(claim_coupon))
                    .default_service(not_allowed()),
            )
            // Auth
            .service(
                web::resource("/auth/me")
                    .route(web::get().to(auth_me))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/auth/csrf")
                    .route(web::get().to(auth_csrf))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/auth/refresh")
                    .route(web::post().to(refresh_token))
                    .default_service(not_allowed()),
            )
            // Admin / moderation
            .service(
                web::resource("/admin/forums/topics/toggle-lock")
                    .route(web::post().to(toggle_topic_lock))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/admin/forums/categories/create")
                    .route(web::post().to(create_category))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/admin/businesses/create")
                    .route(web::post().to(create_business))
                    .default_service(not_allowed()),
            )
            .service(
                web::resource("/admin/reviews/moderate")
                    .route(web::post().to(moderate_review))
                    .default_service(not_allowed()),
            ),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub limiter: RateLimiterFacade,
}

type RawFields = HashMap<String, String>;

async fn method_not_allowed() -> Result<HttpResponse, ApiError> {
    Err(ApiError::MethodNotAllowed)
}

fn ensure_csrf(ident: &Identity, token: &str) -> Result<(), ApiError> {
    if csrf::verify(&ident.subject(), token) {
        Ok(())
    } else {
        Err(ApiError::CsrfInvalid)
    }
}

macro_rules! ensure_elevated {
    ($ident:expr) => {
        if !$ident.is_elevated() {
            return Err(ApiError::Forbidden);
        }
    };
}

macro_rules! ensure_admin {
    ($ident:expr) => {
        if !$ident.is_admin() {
            return Err(ApiError::Forbidden);
        }
    };
}

fn elevated(ident: &Option<Identity>) -> bool {
    ident.as_ref().map(Identity::is_elevated).unwrap_or(false)
}

// ---------------- Forum: listings ---------------------------------

pub async fn list_categories(
    ident: Option<Identity>,
    state: web::Data<AppState>,
    query: web::Query<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let v = Validator::new(&query);
    let include_deleted = elevated(&ident) && v.flag("include_deleted");
    let categories = state.repo.list_categories(include_deleted).await?;
    let mut body = success_body("ok");
    body.insert("categories".into(), json!(categories));
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/forums/topics/list",
    params(
        ("category_id" = i64, Query, description = "Category id"),
        ("page" = Option<i64>, Query, description = "1-based page"),
        ("limit" = Option<i64>, Query, description = "Page size, max 100")
    ),
    responses(
        (status = 200, description = "Topics in the category"),
        (status = 404, description = "Category not found"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn list_topics(
    ident: Option<Identity>,
    state: web::Data<AppState>,
    query: web::Query<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&query);
    let category_id = v.require_id("category_id");
    let page = v.optional_int("page", 1, 1, 100_000);
    let limit = v.optional_int("limit", 20, 1, 100);
    let include_deleted = elevated(&ident) && v.flag("include_deleted");
    v.finish()?;

    let category = state.repo.get_category(category_id).await?;
    if !Lifecycle::is_active(category.deleted_at) && !include_deleted {
        return Err(ApiError::NotFound);
    }
    let (topics, total) = state.repo.list_topics(category_id, include_deleted, page, limit).await?;
    let mut body = success_body("ok");
    body.insert("topics".into(), json!(topics));
    body.insert("total".into(), json!(total));
    body.insert("page".into(), json!(page));
    body.insert("limit".into(), json!(limit));
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/forums/posts/list",
    params(("topic_id" = i64, Query, description = "Topic id")),
    responses(
        (status = 200, description = "Posts in the topic"),
        (status = 404, description = "Topic not found"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn list_posts(
    ident: Option<Identity>,
    state: web::Data<AppState>,
    query: web::Query<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&query);
    let topic_id = v.require_id("topic_id");
    let include_deleted = elevated(&ident) && v.flag("include_deleted");
    v.finish()?;

    let topic = state.repo.get_topic(topic_id).await?;
    if !Lifecycle::is_active(topic.deleted_at) && !include_deleted {
        return Err(ApiError::NotFound);
    }
    let posts = state.repo.list_posts(topic_id, include_deleted).await?;
    let mut body = success_body("ok");
    body.insert("posts".into(), json!(posts));
    body.insert("topic".into(), json!(topic));
    Ok(HttpResponse::Ok().json(body))
}

// ---------------- Forum: mutations --------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/forums/topics/create",
    responses(
        (status = 201, description = "Topic and first post created"),
        (status = 403, description = "CSRF failure"),
        (status = 404, description = "Category not found"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn create_topic(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&form);
    let category_id = v.require_id("category_id");
    let title = v.require_text("title", 3, 200);
    let content = v.require_text("content", 2, 10_000);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;
    if !state.limiter.allow_topic(ident.user_id) {
        return Err(ApiError::RateLimited);
    }

    let created = state
        .repo
        .create_topic(NewTopic { category_id, user_id: ident.user_id, title, content })
        .await?;
    metrics::increment_counter!("agora_topics_created_total");
    let mut body = success_body("topic created");
    body.insert("topic".into(), json!(created.topic));
    body.insert("first_post".into(), json!(created.first_post));
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/forums/topics/delete",
    responses(
        (status = 200, description = "Topic soft-deleted"),
        (status = 403, description = "Not the owner, topic locked, or CSRF failure"),
        (status = 404, description = "Topic missing or already deleted"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn delete_topic(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&form);
    let topic_id = v.require_id("topic_id");
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let topic = state.repo.get_topic(topic_id).await?;
    if !Lifecycle::is_active(topic.deleted_at) {
        return Err(ApiError::NotFound);
    }
    authorize_mutation(
        &ident,
        &MutationTarget { owner_id: topic.user_id, parent_locked: topic.is_locked },
    )?;

    state.repo.soft_delete_topic(topic_id, ident.user_id).await?;
    metrics::increment_counter!("agora_topics_deleted_total");
    let mut body = success_body("topic deleted");
    body.insert("topic_deleted".into(), json!(true));
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/forums/posts/create",
    responses(
        (status = 201, description = "Post created"),
        (status = 403, description = "Topic locked or CSRF failure"),
        (status = 404, description = "Topic missing or deleted"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn create_post(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&form);
    let topic_id = v.require_id("topic_id");
    let content = v.require_text("content", 2, 10_000);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;
    if !state.limiter.allow_post(ident.user_id) {
        return Err(ApiError::RateLimited);
    }

    let topic = state.repo.get_topic(topic_id).await?;
    if !Lifecycle::is_active(topic.deleted_at) {
        return Err(ApiError::NotFound);
    }
    // Posting into a locked topic is a lock denial, never an ownership one.
    authorize_mutation(
        &ident,
        &MutationTarget { owner_id: ident.user_id, parent_locked: topic.is_locked },
    )?;

    let post = state
        .repo
        .create_post(NewPost { topic_id, user_id: ident.user_id, content })
        .await?;
    metrics::increment_counter!("agora_posts_created_total");
    let mut body = success_body("post created");
    body.insert("post".into(), json!(post));
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/forums/posts/update",
    responses(
        (status = 200, description = "Post content replaced"),
        (status = 403, description = "Not the owner, topic locked, or CSRF failure"),
        (status = 404, description = "Post missing or deleted"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn update_post(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&form);
    let post_id = v.require_id("post_id");
    let content = v.require_text("content", 2, 10_000);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let post = state.repo.get_post(post_id).await?;
    if !Lifecycle::is_active(post.deleted_at) {
        return Err(ApiError::NotFound);
    }
    let topic = state.repo.get_topic(post.topic_id).await?;
    if !Lifecycle::is_active(topic.deleted_at) {
        return Err(ApiError::NotFound);
    }
    authorize_mutation(
        &ident,
        &MutationTarget { owner_id: post.user_id, parent_locked: topic.is_locked },
    )?;

    let post = state.repo.update_post_content(post_id, content).await?;
    let mut body = success_body("post updated");
    body.insert("post".into(), json!(post));
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/forums/posts/delete",
    responses(
        (status = 200, description = "Post soft-deleted; cascades to the topic when it was the first post"),
        (status = 403, description = "Not the owner, topic locked, or CSRF failure"),
        (status = 404, description = "Post missing or already deleted"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn delete_post(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&form);
    let post_id = v.require_id("post_id");
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let post = state.repo.get_post(post_id).await?;
    if !Lifecycle::is_active(post.deleted_at) {
        return Err(ApiError::NotFound);
    }
    let topic = state.repo.get_topic(post.topic_id).await?;
    if !Lifecycle::is_active(topic.deleted_at) {
        return Err(ApiError::NotFound);
    }
    authorize_mutation(
        &ident,
        &MutationTarget { owner_id: post.user_id, parent_locked: topic.is_locked },
    )?;

    let outcome = state.repo.soft_delete_post(post_id, ident.user_id).await?;
    metrics::increment_counter!("agora_posts_deleted_total");
    let mut body = success_body("post deleted");
    body.insert("post_deleted".into(), json!(true));
    body.insert("is_first_post".into(), json!(outcome.is_first_post));
    body.insert("topic_deleted".into(), json!(outcome.topic_deleted));
    body.insert("topic_post_count".into(), json!(outcome.topic_post_count));
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/forums/topics/toggle-lock",
    responses(
        (status = 200, description = "Lock state flipped"),
        (status = 403, description = "Requires an elevated role, or CSRF failure"),
        (status = 404, description = "Topic missing or deleted"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn toggle_topic_lock(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    ensure_elevated!(ident);
    let mut v = Validator::new(&form);
    let topic_id = v.require_id("topic_id");
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let topic = state.repo.toggle_topic_lock(topic_id, ident.user_id).await?;
    metrics::increment_counter!("agora_topic_lock_toggles_total");
    let message = if topic.is_locked { "topic locked" } else { "topic unlocked" };
    let mut body = success_body(message);
    body.insert("is_locked".into(), json!(topic.is_locked));
    body.insert("locked_at".into(), json!(topic.locked_at));
    body.insert("locked_by_user_id".into(), json!(topic.locked_by_user_id));
    Ok(HttpResponse::Ok().json(body))
}

pub async fn create_category(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(ident);
    let mut v = Validator::new(&form);
    let name = v.require_text("name", 2, 80);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let category = state.repo.create_category(NewCategory { name }).await.map_err(|e| match e {
        RepoError::Conflict => ApiError::field("name", "a category with this name already exists"),
        other => other.into(),
    })?;
    let mut body = success_body("category created");
    body.insert("category".into(), json!(category));
    Ok(HttpResponse::Created().json(body))
}

// ---------------- Directory & reviews -----------------------------

pub async fn list_businesses(
    ident: Option<Identity>,
    state: web::Data<AppState>,
    query: web::Query<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let v = Validator::new(&query);
    let include_deleted = elevated(&ident) && v.flag("include_deleted");
    let businesses = state.repo.list_businesses(include_deleted).await?;
    let mut body = success_body("ok");
    body.insert("businesses".into(), json!(businesses));
    Ok(HttpResponse::Ok().json(body))
}

pub async fn create_business(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(ident);
    let mut v = Validator::new(&form);
    let name = v.require_text("name", 2, 120);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let business = state.repo.create_business(NewBusiness { name }).await.map_err(|e| match e {
        RepoError::Conflict => ApiError::field("name", "a business with this name already exists"),
        other => other.into(),
    })?;
    let mut body = success_body("business created");
    body.insert("business".into(), json!(business));
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    get,
    path = "/api/v1/reviews/list",
    params(
        ("business_id" = i64, Query, description = "Business id"),
        ("page" = Option<i64>, Query, description = "1-based page"),
        ("limit" = Option<i64>, Query, description = "Page size, max 100"),
        ("status" = Option<String>, Query, description = "Elevated only: pending/approved/rejected")
    ),
    responses(
        (status = 200, description = "Reviews for the business"),
        (status = 403, description = "Status filter requires an elevated role"),
        (status = 404, description = "Business not found"),
        (status = 422, description = "Validation failure")
    )
)]
pub async fn list_reviews(
    ident: Option<Identity>,
    state: web::Data<AppState>,
    query: web::Query<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&query);
    let business_id = v.require_id("business_id");
    let page = v.optional_int("page", 1, 1, 100_000);
    let limit = v.optional_int("limit", 20, 1, 100);
    let status_param = v.optional_choice("status", &["pending", "approved", "rejected"]);
    v.finish()?;

    // Everyone sees approved reviews; the moderation queue needs a role.
    let status = match status_param.as_deref().and_then(ReviewStatus::parse) {
        None => ReviewStatus::Approved,
        Some(ReviewStatus::Approved) => ReviewStatus::Approved,
        Some(other) => {
            if !elevated(&ident) {
                return Err(ApiError::Forbidden);
            }
            other
        }
    };

    let business = state.repo.get_business(business_id).await?;
    if !Lifecycle::is_active(business.deleted_at) {
        return Err(ApiError::NotFound);
    }
    let (reviews, total) = state.repo.list_reviews(business_id, status, page, limit).await?;
    let mut body = success_body("ok");
    body.insert("reviews".into(), json!(reviews));
    body.insert("total".into(), json!(total));
    body.insert("page".into(), json!(page));
    body.insert("limit".into(), json!(limit));
    Ok(HttpResponse::Ok().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/reviews/create",
    responses(
        (status = 201, description = "Review created, pending moderation"),
        (status = 403, description = "CSRF failure"),
        (status = 404, description = "Business not found"),
        (status = 422, description = "Validation failure or duplicate review")
    )
)]
pub async fn create_review(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    let mut v = Validator::new(&form);
    let business_id = v.require_id("business_id");
    let rating = v.require_int("rating", 1, 5);
    let title = v.require_text("title", 3, 200);
    let comment = v.require_text("comment", 2, 4_000);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;
    if !state.limiter.allow_review(ident.user_id) {
        return Err(ApiError::RateLimited);
    }

    let review = state
        .repo
        .create_review(NewReview {
            business_id,
            user_id: ident.user_id,
            rating: rating as i16,
            title,
            comment,
        })
        .await
        .map_err(|e| match e {
            RepoError::Conflict => {
                ApiError::field("business_id", "you have already reviewed this business")
            }
            other => other.into(),
        })?;
    metrics::increment_counter!("agora_reviews_created_total");
    let mut body = success_body("review submitted for moderation");
    body.insert("review".into(), json!(review));
    Ok(HttpResponse::Created().json(body))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/reviews/moderate",
    responses(
        (status = 200, description = "Review approved or rejected"),
        (status = 403, description = "Requires an elevated role, or CSRF failure"),
        (status = 404, description = "Review not found"),
        (status = 422, description = "Validation failure or review not pending")
    )
)]
pub async fn moderate_review(
    ident: Identity,
    state: web::Data<AppState>,
    form: web::Form<RawFields>,
) -> Result<HttpResponse, ApiError> {
    ensure_elevated!(ident);
    let mut v = Validator::new(&form);
    let review_id = v.require_id("review_id");
    let action_param = v.require_choice("action", &["approve", "reject"]);
    let csrf_token = v.require_text("csrf_token", 1, 128);
    v.finish()?;
    ensure_csrf(&ident, &csrf_token)?;

    let Some(action) = ModerationAction::parse(&action_param) else {
        return Err(ApiError::field("action", "must be one of: approve, reject"));
    };
    let review = state.repo.moderate_review(review_id, action, ident.user_id).await?;
    metrics::increment_counter!("agora_reviews_moderated_total");
    let mut body = success_body("review moderated");
    body.insert("review".into(), json!(review));
    Ok(HttpResponse::Ok().json(body))
}

// ---------------- Auth / misc -------------------------------------

pub async fn auth_me(ident: Identity) -> Result<HttpResponse, ApiError> {
    let mut body = success_body("ok");
    body.insert("user_id".into(), json!(ident.user_id));
    body.insert("roles".into(), json!(ident.roles));
    body.insert("elevated".into(), json!(ident.is_elevated()));
    Ok(HttpResponse::Ok().json(body))
}

pub async fn auth_csrf(ident: Identity) -> Result<HttpResponse, ApiError> {
    let mut body = success_body("ok");
    body.insert("csrf_token".into(), json!(csrf::issue(&ident.subject())));
    Ok(HttpResponse::Ok().json(body))
}

pub async fn refresh_token(ident: Identity) -> Result<HttpResponse, ApiError> {
    let token = crate::auth::create_jwt(ident.user_id, ident.roles.clone())
        .map_err(|_| ApiError::Internal)?;
    let mut body = success_body("ok");
    body.insert("token".into(), json!(token));
    Ok(HttpResponse::Ok().json(body))
}

pub async fn claim_coupon() -> Result<HttpResponse, ApiError> {
    Err(ApiError::Unimplemented)
}
