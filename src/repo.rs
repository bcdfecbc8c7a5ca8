use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("{0}")]
    InvalidState(&'static str),
    #[error("database: {0}")]
    Database(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self, include_deleted: bool) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
}

#[async_trait]
pub trait TopicRepo: Send + Sync {
    async fn get_topic(&self, id: Id) -> RepoResult<Topic>;
    async fn list_topics(
        &self,
        category_id: Id,
        include_deleted: bool,
        page: i64,
        limit: i64,
    ) -> RepoResult<(Vec<Topic>, i64)>;
    /// Topic + first post, atomically; sets the aggregate columns and bumps
    /// the category counters.
    async fn create_topic(&self, new: NewTopic) -> RepoResult<TopicCreated>;
    async fn soft_delete_topic(&self, id: Id, by: Id) -> RepoResult<()>;
    /// Atomic flip; last-write-wins under concurrent calls.
    async fn toggle_topic_lock(&self, id: Id, by: Id) -> RepoResult<Topic>;
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn list_posts(&self, topic_id: Id, include_deleted: bool) -> RepoResult<Vec<Post>>;
    async fn create_post(&self, new: NewPost) -> RepoResult<Post>;
    async fn update_post_content(&self, id: Id, content: String) -> RepoResult<Post>;
    /// Soft delete plus the dependent-aggregate work: cascade when the target
    /// is the topic's first post, otherwise recount from the survivors.
    async fn soft_delete_post(&self, id: Id, by: Id) -> RepoResult<PostDeleteOutcome>;
}

#[async_trait]
pub trait DirectoryRepo: Send + Sync {
    async fn list_businesses(&self, include_deleted: bool) -> RepoResult<Vec<Business>>;
    async fn get_business(&self, id: Id) -> RepoResult<Business>;
    async fn create_business(&self, new: NewBusiness) -> RepoResult<Business>;
    async fn list_reviews(
        &self,
        business_id: Id,
        status: ReviewStatus,
        page: i64,
        limit: i64,
    ) -> RepoResult<(Vec<Review>, i64)>;
    async fn create_review(&self, new: NewReview) -> RepoResult<Review>;
    /// pending -> approved/rejected only; approval folds the rating into the
    /// business aggregates in the same transaction.
    async fn moderate_review(&self, id: Id, action: ModerationAction, by: Id) -> RepoResult<Review>;
}

pub trait Repo: CategoryRepo + TopicRepo + PostRepo + DirectoryRepo {}

impl<T> Repo for T where T: CategoryRepo + TopicRepo + PostRepo + DirectoryRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use crate::lifecycle::{plan_post_delete, review_transition, PostDeletePlan};
    use chrono::{DateTime, Utc};
    use rand::Rng;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        categories: HashMap<Id, Category>,
        topics: HashMap<Id, Topic>,
        posts: HashMap<Id, Post>,
        businesses: HashMap<Id, Business>,
        reviews: HashMap<Id, Review>,
        next_id: Id,
    }

    /// Development/test backend. All mutations happen under one write guard,
    /// which gives the same all-or-nothing visibility the Postgres
    /// transactions provide.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("AGORA_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!("failed to parse snapshot '{}': {e}; starting empty", path.display());
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = &*self.snapshot_path;
            if let Ok(bytes) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(path, bytes) {
                    log::warn!("failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }

        fn suffixed(base: &str) -> String {
            format!("{}-{:04x}", base, rand::thread_rng().gen_range(0u16..=u16::MAX))
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    fn page_slice<T: Clone>(items: &[T], page: i64, limit: i64) -> Vec<T> {
        let start = ((page - 1) * limit).max(0) as usize;
        items.iter().skip(start).take(limit.max(0) as usize).cloned().collect()
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(&self, include_deleted: bool) -> RepoResult<Vec<Category>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .categories
                .values()
                .filter(|c| include_deleted || c.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            let s = self.state.read().unwrap();
            s.categories.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let mut s = self.state.write().unwrap();
            if s.categories.values().any(|c| c.name.eq_ignore_ascii_case(&new.name)) {
                return Err(RepoError::Conflict);
            }
            let mut slug = slugify(&new.name);
            while s.categories.values().any(|c| c.slug == slug) {
                slug = Self::suffixed(&slugify(&new.name));
            }
            let id = Self::next_id(&mut s);
            let category = Category {
                id,
                name: new.name,
                slug,
                topic_count: 0,
                post_count: 0,
                deleted_at: None,
            };
            s.categories.insert(id, category.clone());
            drop(s);
            self.persist();
            Ok(category)
        }
    }

    #[async_trait]
    impl TopicRepo for InMemRepo {
        async fn get_topic(&self, id: Id) -> RepoResult<Topic> {
            let s = self.state.read().unwrap();
            s.topics.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_topics(
            &self,
            category_id: Id,
            include_deleted: bool,
            page: i64,
            limit: i64,
        ) -> RepoResult<(Vec<Topic>, i64)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .topics
                .values()
                .filter(|t| t.category_id == category_id)
                .filter(|t| include_deleted || t.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            let total = v.len() as i64;
            Ok((page_slice(&v, page, limit), total))
        }

        async fn create_topic(&self, new: NewTopic) -> RepoResult<TopicCreated> {
            let mut s = self.state.write().unwrap();
            match s.categories.get(&new.category_id) {
                Some(c) if c.deleted_at.is_none() => {}
                _ => return Err(RepoError::NotFound),
            }
            let mut slug = slugify(&new.title);
            while s.topics.values().any(|t| t.slug == slug) {
                slug = Self::suffixed(&slugify(&new.title));
            }
            let now = Utc::now();
            let topic_id = Self::next_id(&mut s);
            let post_id = Self::next_id(&mut s);
            let post = Post {
                id: post_id,
                topic_id,
                user_id: new.user_id,
                content: new.content,
                created_at: now,
                updated_at: None,
                deleted_at: None,
                deleted_by_user_id: None,
            };
            let topic = Topic {
                id: topic_id,
                category_id: new.category_id,
                user_id: new.user_id,
                title: new.title,
                slug,
                is_locked: false,
                locked_at: None,
                locked_by_user_id: None,
                first_post_id: Some(post_id),
                last_post_id: Some(post_id),
                post_count: 1,
                created_at: now,
                deleted_at: None,
                deleted_by_user_id: None,
            };
            s.topics.insert(topic_id, topic.clone());
            s.posts.insert(post_id, post.clone());
            if let Some(c) = s.categories.get_mut(&new.category_id) {
                c.topic_count += 1;
                c.post_count += 1;
            }
            drop(s);
            self.persist();
            Ok(TopicCreated { topic, first_post: post })
        }

        async fn soft_delete_topic(&self, id: Id, by: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let (category_id, active_posts) = {
                let t = s.topics.get_mut(&id).ok_or(RepoError::NotFound)?;
                if t.deleted_at.is_some() {
                    return Err(RepoError::NotFound);
                }
                t.deleted_at = Some(Utc::now());
                t.deleted_by_user_id = Some(by);
                (t.category_id, t.post_count)
            };
            if let Some(c) = s.categories.get_mut(&category_id) {
                c.topic_count -= 1;
                c.post_count -= active_posts;
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn toggle_topic_lock(&self, id: Id, by: Id) -> RepoResult<Topic> {
            let mut s = self.state.write().unwrap();
            let t = s.topics.get_mut(&id).ok_or(RepoError::NotFound)?;
            if t.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            if t.is_locked {
                t.is_locked = false;
                t.locked_at = None;
                t.locked_by_user_id = None;
            } else {
                t.is_locked = true;
                t.locked_at = Some(Utc::now());
                t.locked_by_user_id = Some(by);
            }
            let updated = t.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_posts(&self, topic_id: Id, include_deleted: bool) -> RepoResult<Vec<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .posts
                .values()
                .filter(|p| p.topic_id == topic_id)
                .filter(|p| include_deleted || p.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            Ok(v)
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let category_id = match s.topics.get(&new.topic_id) {
                Some(t) if t.deleted_at.is_none() => t.category_id,
                _ => return Err(RepoError::NotFound),
            };
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                topic_id: new.topic_id,
                user_id: new.user_id,
                content: new.content,
                created_at: Utc::now(),
                updated_at: None,
                deleted_at: None,
                deleted_by_user_id: None,
            };
            s.posts.insert(id, post.clone());
            if let Some(t) = s.topics.get_mut(&new.topic_id) {
                t.post_count += 1;
                t.last_post_id = Some(id);
            }
            if let Some(c) = s.categories.get_mut(&category_id) {
                c.post_count += 1;
            }
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn update_post_content(&self, id: Id, content: String) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let p = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if p.deleted_at.is_some() {
                return Err(RepoError::NotFound);
            }
            p.content = content;
            p.updated_at = Some(Utc::now());
            let updated = p.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_post(&self, id: Id, by: Id) -> RepoResult<PostDeleteOutcome> {
            let mut s = self.state.write().unwrap();
            let (topic_id, category_id, topic_was_active, plan) = {
                let post = s.posts.get(&id).ok_or(RepoError::NotFound)?;
                if post.deleted_at.is_some() {
                    return Err(RepoError::NotFound);
                }
                let topic = s.topics.get(&post.topic_id).ok_or(RepoError::NotFound)?;
                (
                    topic.id,
                    topic.category_id,
                    topic.deleted_at.is_none(),
                    plan_post_delete(id, topic.first_post_id),
                )
            };
            let now = Utc::now();
            let active_before = s
                .posts
                .values()
                .filter(|p| p.topic_id == topic_id && p.deleted_at.is_none())
                .count() as i64;
            if let Some(p) = s.posts.get_mut(&id) {
                p.deleted_at = Some(now);
                p.deleted_by_user_id = Some(by);
            }
            let remaining: Vec<(Id, DateTime<Utc>)> = s
                .posts
                .values()
                .filter(|p| p.topic_id == topic_id && p.deleted_at.is_none())
                .map(|p| (p.id, p.created_at))
                .collect();
            let post_count = remaining.len() as i64;
            let last_post_id = remaining
                .iter()
                .max_by_key(|(pid, created)| (*created, *pid))
                .map(|(pid, _)| *pid);
            let mut topic_deleted = false;
            if let Some(t) = s.topics.get_mut(&topic_id) {
                t.post_count = post_count;
                t.last_post_id = last_post_id;
                if plan == PostDeletePlan::CascadeTopic && t.deleted_at.is_none() {
                    t.deleted_at = Some(now);
                    t.deleted_by_user_id = Some(by);
                    topic_deleted = true;
                }
            }
            if topic_was_active {
                if let Some(c) = s.categories.get_mut(&category_id) {
                    if topic_deleted {
                        c.topic_count -= 1;
                        c.post_count -= active_before;
                    } else {
                        c.post_count -= 1;
                    }
                }
            }
            drop(s);
            self.persist();
            Ok(PostDeleteOutcome {
                post_id: id,
                is_first_post: plan == PostDeletePlan::CascadeTopic,
                topic_deleted,
                topic_post_count: post_count,
                topic_last_post_id: last_post_id,
            })
        }
    }

    #[async_trait]
    impl DirectoryRepo for InMemRepo {
        async fn list_businesses(&self, include_deleted: bool) -> RepoResult<Vec<Business>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .businesses
                .values()
                .filter(|b| include_deleted || b.deleted_at.is_none())
                .cloned()
                .collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(v)
        }

        async fn get_business(&self, id: Id) -> RepoResult<Business> {
            let s = self.state.read().unwrap();
            s.businesses.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_business(&self, new: NewBusiness) -> RepoResult<Business> {
            let mut s = self.state.write().unwrap();
            if s.businesses.values().any(|b| b.name.eq_ignore_ascii_case(&new.name)) {
                return Err(RepoError::Conflict);
            }
            let mut slug = slugify(&new.name);
            while s.businesses.values().any(|b| b.slug == slug) {
                slug = Self::suffixed(&slugify(&new.name));
            }
            let id = Self::next_id(&mut s);
            let business = Business {
                id,
                name: new.name,
                slug,
                review_count: 0,
                rating_sum: 0,
                deleted_at: None,
            };
            s.businesses.insert(id, business.clone());
            drop(s);
            self.persist();
            Ok(business)
        }

        async fn list_reviews(
            &self,
            business_id: Id,
            status: ReviewStatus,
            page: i64,
            limit: i64,
        ) -> RepoResult<(Vec<Review>, i64)> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .reviews
                .values()
                .filter(|r| r.business_id == business_id && r.status == status)
                .cloned()
                .collect();
            v.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            let total = v.len() as i64;
            Ok((page_slice(&v, page, limit), total))
        }

        async fn create_review(&self, new: NewReview) -> RepoResult<Review> {
            let mut s = self.state.write().unwrap();
            match s.businesses.get(&new.business_id) {
                Some(b) if b.deleted_at.is_none() => {}
                _ => return Err(RepoError::NotFound),
            }
            // One live review per user and business; a rejected one may be retried.
            if s.reviews.values().any(|r| {
                r.business_id == new.business_id
                    && r.user_id == new.user_id
                    && r.status != ReviewStatus::Rejected
            }) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let review = Review {
                id,
                business_id: new.business_id,
                user_id: new.user_id,
                rating: new.rating,
                title: new.title,
                comment: new.comment,
                status: ReviewStatus::Pending,
                created_at: Utc::now(),
                moderated_at: None,
                moderated_by_user_id: None,
            };
            s.reviews.insert(id, review.clone());
            drop(s);
            self.persist();
            Ok(review)
        }

        async fn moderate_review(
            &self,
            id: Id,
            action: ModerationAction,
            by: Id,
        ) -> RepoResult<Review> {
            let mut s = self.state.write().unwrap();
            let (business_id, rating, next) = {
                let r = s.reviews.get(&id).ok_or(RepoError::NotFound)?;
                let next = review_transition(r.status, action)
                    .ok_or(RepoError::InvalidState("review is not pending"))?;
                (r.business_id, r.rating, next)
            };
            let updated = {
                let r = s.reviews.get_mut(&id).ok_or(RepoError::NotFound)?;
                r.status = next;
                r.moderated_at = Some(Utc::now());
                r.moderated_by_user_id = Some(by);
                r.clone()
            };
            if next == ReviewStatus::Approved {
                if let Some(b) = s.businesses.get_mut(&business_id) {
                    b.review_count += 1;
                    b.rating_sum += rating as i64;
                }
            }
            drop(s);
            self.persist();
            Ok(updated)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use crate::lifecycle::{plan_post_delete, review_transition, PostDeletePlan};
    use chrono::{DateTime, Utc};
    use rand::Rng;
    use sqlx::{PgPool, Postgres, Transaction};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: PgPool,
    }

    impl PgRepo {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    fn db_err(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Database(other.to_string()),
        }
    }

    /// Resolve a free slug within the transaction, suffixing on collision.
    async fn unique_slug(
        tx: &mut Transaction<'_, Postgres>,
        table: &str,
        base: &str,
    ) -> RepoResult<String> {
        let query = format!("SELECT 1 FROM {table} WHERE slug = $1");
        let mut slug = base.to_string();
        loop {
            let taken: Option<i32> = sqlx::query_scalar(&query)
                .bind(&slug)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?;
            if taken.is_none() {
                return Ok(slug);
            }
            slug = format!("{}-{:04x}", base, rand::thread_rng().gen_range(0u16..=u16::MAX));
        }
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(&self, include_deleted: bool) -> RepoResult<Vec<Category>> {
            let sql = if include_deleted {
                "SELECT * FROM categories ORDER BY name"
            } else {
                "SELECT * FROM categories WHERE deleted_at IS NULL ORDER BY name"
            };
            sqlx::query_as(sql).fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as("SELECT * FROM categories WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let dup: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM categories WHERE lower(name) = lower($1)")
                    .bind(&new.name)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if dup.is_some() {
                return Err(RepoError::Conflict);
            }
            let slug = unique_slug(&mut tx, "categories", &slugify(&new.name)).await?;
            let category: Category =
                sqlx::query_as("INSERT INTO categories (name, slug) VALUES ($1, $2) RETURNING *")
                    .bind(&new.name)
                    .bind(&slug)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(category)
        }
    }

    #[async_trait]
    impl TopicRepo for PgRepo {
        async fn get_topic(&self, id: Id) -> RepoResult<Topic> {
            sqlx::query_as("SELECT * FROM topics WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn list_topics(
            &self,
            category_id: Id,
            include_deleted: bool,
            page: i64,
            limit: i64,
        ) -> RepoResult<(Vec<Topic>, i64)> {
            let filter = if include_deleted { "" } else { " AND deleted_at IS NULL" };
            let rows: Vec<Topic> = sqlx::query_as(&format!(
                "SELECT * FROM topics WHERE category_id = $1{filter} \
                 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
            ))
            .bind(category_id)
            .bind(limit)
            .bind((page - 1) * limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            let total: i64 = sqlx::query_scalar(&format!(
                "SELECT count(*) FROM topics WHERE category_id = $1{filter}"
            ))
            .bind(category_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            Ok((rows, total))
        }

        async fn create_topic(&self, new: NewTopic) -> RepoResult<TopicCreated> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let category: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM categories WHERE id = $1 AND deleted_at IS NULL")
                    .bind(new.category_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if category.is_none() {
                return Err(RepoError::NotFound);
            }
            let slug = unique_slug(&mut tx, "topics", &slugify(&new.title)).await?;
            let topic: Topic = sqlx::query_as(
                "INSERT INTO topics (category_id, user_id, title, slug) VALUES ($1, $2, $3, $4) RETURNING *",
            )
            .bind(new.category_id)
            .bind(new.user_id)
            .bind(&new.title)
            .bind(&slug)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            let first_post: Post = sqlx::query_as(
                "INSERT INTO posts (topic_id, user_id, content) VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(topic.id)
            .bind(new.user_id)
            .bind(&new.content)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            let topic: Topic = sqlx::query_as(
                "UPDATE topics SET first_post_id = $2, last_post_id = $2, post_count = 1 \
                 WHERE id = $1 RETURNING *",
            )
            .bind(topic.id)
            .bind(first_post.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            sqlx::query(
                "UPDATE categories SET topic_count = topic_count + 1, post_count = post_count + 1 \
                 WHERE id = $1",
            )
            .bind(new.category_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(TopicCreated { topic, first_post })
        }

        async fn soft_delete_topic(&self, id: Id, by: Id) -> RepoResult<()> {
            #[derive(sqlx::FromRow)]
            struct Tombstoned {
                category_id: Id,
                post_count: i64,
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            // Zero rows means missing or already deleted; both are a 404 no-op.
            let row: Tombstoned = sqlx::query_as(
                "UPDATE topics SET deleted_at = now(), deleted_by_user_id = $2 \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING category_id, post_count",
            )
            .bind(id)
            .bind(by)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)?;
            sqlx::query(
                "UPDATE categories SET topic_count = topic_count - 1, post_count = post_count - $2 \
                 WHERE id = $1",
            )
            .bind(row.category_id)
            .bind(row.post_count)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(())
        }

        async fn toggle_topic_lock(&self, id: Id, by: Id) -> RepoResult<Topic> {
            sqlx::query_as(
                "UPDATE topics SET \
                    is_locked = NOT is_locked, \
                    locked_at = CASE WHEN is_locked THEN NULL ELSE now() END, \
                    locked_by_user_id = CASE WHEN is_locked THEN NULL ELSE $2 END \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING *",
            )
            .bind(id)
            .bind(by)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as("SELECT * FROM posts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn list_posts(&self, topic_id: Id, include_deleted: bool) -> RepoResult<Vec<Post>> {
            let filter = if include_deleted { "" } else { " AND deleted_at IS NULL" };
            sqlx::query_as(&format!(
                "SELECT * FROM posts WHERE topic_id = $1{filter} ORDER BY created_at ASC, id ASC"
            ))
            .bind(topic_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
        }

        async fn create_post(&self, new: NewPost) -> RepoResult<Post> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let topic: Topic =
                sqlx::query_as("SELECT * FROM topics WHERE id = $1 AND deleted_at IS NULL FOR UPDATE")
                    .bind(new.topic_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?
                    .ok_or(RepoError::NotFound)?;
            let post: Post = sqlx::query_as(
                "INSERT INTO posts (topic_id, user_id, content) VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(new.topic_id)
            .bind(new.user_id)
            .bind(&new.content)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            sqlx::query("UPDATE topics SET post_count = post_count + 1, last_post_id = $2 WHERE id = $1")
                .bind(topic.id)
                .bind(post.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            sqlx::query("UPDATE categories SET post_count = post_count + 1 WHERE id = $1")
                .bind(topic.category_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(post)
        }

        async fn update_post_content(&self, id: Id, content: String) -> RepoResult<Post> {
            sqlx::query_as(
                "UPDATE posts SET content = $2, updated_at = now() \
                 WHERE id = $1 AND deleted_at IS NULL RETURNING *",
            )
            .bind(id)
            .bind(&content)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)
        }

        async fn soft_delete_post(&self, id: Id, by: Id) -> RepoResult<PostDeleteOutcome> {
            #[derive(sqlx::FromRow)]
            struct PostDeleteCtx {
                topic_id: Id,
                category_id: Id,
                first_post_id: Option<Id>,
                topic_deleted_at: Option<DateTime<Utc>>,
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let ctx: PostDeleteCtx = sqlx::query_as(
                "SELECT p.topic_id, t.category_id, t.first_post_id, t.deleted_at AS topic_deleted_at \
                 FROM posts p JOIN topics t ON t.id = p.topic_id \
                 WHERE p.id = $1 AND p.deleted_at IS NULL \
                 FOR UPDATE OF p, t",
            )
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or(RepoError::NotFound)?;
            let res = sqlx::query(
                "UPDATE posts SET deleted_at = now(), deleted_by_user_id = $2 \
                 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id)
            .bind(by)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            let plan = plan_post_delete(id, ctx.first_post_id);
            let topic: Topic = sqlx::query_as(
                "UPDATE topics SET \
                    post_count = (SELECT count(*) FROM posts WHERE topic_id = $1 AND deleted_at IS NULL), \
                    last_post_id = (SELECT id FROM posts WHERE topic_id = $1 AND deleted_at IS NULL \
                                    ORDER BY created_at DESC, id DESC LIMIT 1) \
                 WHERE id = $1 RETURNING *",
            )
            .bind(ctx.topic_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            let topic_was_active = ctx.topic_deleted_at.is_none();
            let mut topic_deleted = false;
            if plan == PostDeletePlan::CascadeTopic && topic_was_active {
                let res = sqlx::query(
                    "UPDATE topics SET deleted_at = now(), deleted_by_user_id = $2 \
                     WHERE id = $1 AND deleted_at IS NULL",
                )
                .bind(ctx.topic_id)
                .bind(by)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
                topic_deleted = res.rows_affected() > 0;
                if topic_deleted {
                    // remaining survivors plus the post just tombstoned
                    sqlx::query(
                        "UPDATE categories SET topic_count = topic_count - 1, post_count = post_count - $2 \
                         WHERE id = $1",
                    )
                    .bind(ctx.category_id)
                    .bind(topic.post_count + 1)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
            } else if topic_was_active {
                sqlx::query("UPDATE categories SET post_count = post_count - 1 WHERE id = $1")
                    .bind(ctx.category_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(PostDeleteOutcome {
                post_id: id,
                is_first_post: plan == PostDeletePlan::CascadeTopic,
                topic_deleted,
                topic_post_count: topic.post_count,
                topic_last_post_id: topic.last_post_id,
            })
        }
    }

    #[async_trait]
    impl DirectoryRepo for PgRepo {
        async fn list_businesses(&self, include_deleted: bool) -> RepoResult<Vec<Business>> {
            let sql = if include_deleted {
                "SELECT * FROM businesses ORDER BY name"
            } else {
                "SELECT * FROM businesses WHERE deleted_at IS NULL ORDER BY name"
            };
            sqlx::query_as(sql).fetch_all(&self.pool).await.map_err(db_err)
        }

        async fn get_business(&self, id: Id) -> RepoResult<Business> {
            sqlx::query_as("SELECT * FROM businesses WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)
        }

        async fn create_business(&self, new: NewBusiness) -> RepoResult<Business> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let dup: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM businesses WHERE lower(name) = lower($1)")
                    .bind(&new.name)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if dup.is_some() {
                return Err(RepoError::Conflict);
            }
            let slug = unique_slug(&mut tx, "businesses", &slugify(&new.name)).await?;
            let business: Business =
                sqlx::query_as("INSERT INTO businesses (name, slug) VALUES ($1, $2) RETURNING *")
                    .bind(&new.name)
                    .bind(&slug)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(business)
        }

        async fn list_reviews(
            &self,
            business_id: Id,
            status: ReviewStatus,
            page: i64,
            limit: i64,
        ) -> RepoResult<(Vec<Review>, i64)> {
            let rows: Vec<Review> = sqlx::query_as(
                "SELECT * FROM reviews WHERE business_id = $1 AND status = $2 \
                 ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
            )
            .bind(business_id)
            .bind(status)
            .bind(limit)
            .bind((page - 1) * limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            let total: i64 = sqlx::query_scalar(
                "SELECT count(*) FROM reviews WHERE business_id = $1 AND status = $2",
            )
            .bind(business_id)
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
            Ok((rows, total))
        }

        async fn create_review(&self, new: NewReview) -> RepoResult<Review> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let business: Option<i32> =
                sqlx::query_scalar("SELECT 1 FROM businesses WHERE id = $1 AND deleted_at IS NULL")
                    .bind(new.business_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if business.is_none() {
                return Err(RepoError::NotFound);
            }
            let dup: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM reviews WHERE business_id = $1 AND user_id = $2 AND status <> 'rejected'",
            )
            .bind(new.business_id)
            .bind(new.user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            if dup.is_some() {
                return Err(RepoError::Conflict);
            }
            let review: Review = sqlx::query_as(
                "INSERT INTO reviews (business_id, user_id, rating, title, comment) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING *",
            )
            .bind(new.business_id)
            .bind(new.user_id)
            .bind(new.rating)
            .bind(&new.title)
            .bind(&new.comment)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(review)
        }

        async fn moderate_review(
            &self,
            id: Id,
            action: ModerationAction,
            by: Id,
        ) -> RepoResult<Review> {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let review: Review = sqlx::query_as("SELECT * FROM reviews WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .ok_or(RepoError::NotFound)?;
            let next = review_transition(review.status, action)
                .ok_or(RepoError::InvalidState("review is not pending"))?;
            let review: Review = sqlx::query_as(
                "UPDATE reviews SET status = $2, moderated_at = now(), moderated_by_user_id = $3 \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(next)
            .bind(by)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
            if next == ReviewStatus::Approved {
                sqlx::query(
                    "UPDATE businesses SET review_count = review_count + 1, rating_sum = rating_sum + $2 \
                     WHERE id = $1",
                )
                .bind(review.business_id)
                .bind(review.rating as i64)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            tx.commit().await.map_err(db_err)?;
            Ok(review)
        }
    }
}
