#![cfg(feature = "inmem-store")]

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{test, App};
use serial_test::serial;

use agora::auth::{create_jwt, Role};
use agora::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use agora::repo::inmem::InMemRepo;
use agora::{config, csrf, AppState};

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    std::env::set_var("AGORA_DATA_DIR", tempfile::tempdir().unwrap().into_path());
    // one post per minute, everything else roomy
    std::env::set_var("RL_POST_LIMIT", "1");
    std::env::set_var("RL_POST_WINDOW", "60");
    std::env::set_var("RL_TOPIC_LIMIT", "10");
    std::env::set_var("RL_REVIEW_LIMIT", "10");
}

fn form(user_id: i64, pairs: &[(&str, &str)]) -> HashMap<String, String> {
    let mut f: HashMap<String, String> =
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    f.insert("csrf_token".into(), csrf::issue(&user_id.to_string()));
    f
}

#[actix_web::test]
#[serial]
async fn second_post_in_window_is_limited() {
    setup_env();
    let app = test::init_service(
        App::new()
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(InMemRepo::new()),
                limiter: RateLimiterFacade::new(
                    InMemoryRateLimiter::new(true),
                    RateLimitConfig::from_env(),
                ),
            }))
            .configure(config),
    )
    .await;

    let admin = create_jwt(1, vec![Role::Admin]).unwrap();
    let user = create_jwt(2, vec![Role::User]).unwrap();
    let other = create_jwt(3, vec![Role::User]).unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/admin/forums/categories/create")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .set_form(form(1, &[("name", "General")]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let category_id = v["category"]["id"].as_i64().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/forums/topics/create")
        .insert_header(("Authorization", format!("Bearer {user}")))
        .set_form(form(2, &[("category_id", &category_id), ("title", "Limits"), ("content", "body")]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    let topic_id = v["topic"]["id"].as_i64().unwrap().to_string();

    // first reply passes
    let req = test::TestRequest::post()
        .uri("/api/v1/forums/posts/create")
        .insert_header(("Authorization", format!("Bearer {user}")))
        .set_form(form(2, &[("topic_id", &topic_id), ("content", "first reply")]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    // second hits the window
    let req = test::TestRequest::post()
        .uri("/api/v1/forums/posts/create")
        .insert_header(("Authorization", format!("Bearer {user}")))
        .set_form(form(2, &[("topic_id", &topic_id), ("content", "second reply")]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 429);
    let v: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(v["success"], false);

    // limits are per user, not global
    let req = test::TestRequest::post()
        .uri("/api/v1/forums/posts/create")
        .insert_header(("Authorization", format!("Bearer {other}")))
        .set_form(form(3, &[("topic_id", &topic_id), ("content", "someone else")]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
}
