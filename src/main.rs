use actix_web::{middleware::Compress, web, App, HttpResponse, HttpServer};
use actix_cors::Cors;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use agora::openapi::ApiDoc;
use agora::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use agora::{config, AppState, SecurityHeaders};

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use agora::repo::inmem::InMemRepo;

async fn metrics_endpoint(handle: web::Data<PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/plain; version=0.0.4"))
        .body(handle.render())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Environment comes from the deployment (shell, systemd, Docker, ...).
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("bootstrapping agora server");

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = InMemRepo::new();
    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    info!("using in-memory repository backend");

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&db_url)
            .expect("Failed to create Pg pool");
        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            eprintln!("migration failed: {e}");
            std::process::exit(1);
        }
        info!("using Postgres repository backend");
        agora::repo::pg::PgRepo::new(pool)
    };

    let limiter = RateLimiterFacade::new(
        InMemoryRateLimiter::new(
            std::env::var("RATE_LIMIT_ENABLED").map(|v| v != "0").unwrap_or(true),
        ),
        RateLimitConfig::from_env(),
    );

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let openapi = ApiDoc::openapi();
    info!("OpenAPI spec generated");

    let port: u16 = std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .route("/metrics", web::get().to(metrics_endpoint))
            .app_data(web::Data::new(prometheus.clone()))
            .app_data(web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                limiter: limiter.clone(),
            }))
    })
    .bind(("0.0.0.0", port))?;

    info!("listening on http://0.0.0.0:{port}");

    server.run().await
}

/// Validate required environment variables before anything binds.
fn validate_env_vars() {
    use std::env;

    if env::var("JWT_SECRET").is_err() {
        eprintln!("Missing required environment variable JWT_SECRET");
        eprintln!("Please copy .env.example to .env and configure it");
        std::process::exit(1);
    }

    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long for security");
            std::process::exit(1);
        }
    }

    // CSRF tokens fall back to JWT_SECRET when CSRF_SECRET is absent.
    if env::var("CSRF_SECRET").is_err() {
        eprintln!("Note: CSRF_SECRET not set, deriving CSRF tokens from JWT_SECRET");
    }
}
