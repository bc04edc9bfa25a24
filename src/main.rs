//! Brandreach API server
//!
//! HTTP surface for the Brandreach influencer marketplace: tracking-link
//! management, click redirection, conversion ingestion from brand
//! integrations, commission review, and payout requests. Built on axum
//! with PostgreSQL storage; all money flows through fixed-point decimals.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use brandreach_backend::{
    attribution::AttributionService,
    auth::{require_admin, require_role, AuthService, AuthUser},
    config::Config,
    database::Database,
    error::{AppError, AppResult},
    metrics::{MetricsService, MetricsSnapshot},
    models::*,
    payouts::PayoutService,
    AppState,
};

/// Standard API response wrapper for consistent JSON responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    /// Creates a successful API response with data
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Health check response with system status information
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    services: ServiceStatus,
}

/// Status of individual services for health monitoring
#[derive(Serialize)]
struct ServiceStatus {
    database: bool,
}

/// Main entry point for the Brandreach API server
#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Arc::new(Config::load()?);

    // Initialize tracing, preferring RUST_LOG over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level)),
        )
        .init();

    info!("Starting Brandreach API server");

    // Initialize services
    let database = Arc::new(Database::new(&config.database_url, 10).await?);
    database.migrate().await?;
    info!("Database connection established");

    let metrics = Arc::new(MetricsService::new());
    let auth = Arc::new(AuthService::new(&config)?);
    let attribution = Arc::new(AttributionService::new(
        database.clone(),
        config.clone(),
        metrics.clone(),
    ));
    let payouts = Arc::new(PayoutService::new(database.clone(), metrics.clone()));

    info!("All services initialized successfully");

    // Create application state
    let state = AppState {
        config: config.clone(),
        database,
        attribution,
        payouts,
        auth,
        metrics,
    };

    // Build router
    let app = Router::new()
        // Health and status endpoints
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        // Authentication
        .route("/auth/login", post(login))
        // Click tracking
        .route("/track/:code", get(track_redirect))
        .route("/tracking/:code/click", post(track_click))
        // Conversions
        .route("/conversions", post(record_conversion))
        .route("/conversions", get(list_conversions))
        .route("/conversions/:id/review", post(review_conversion))
        // Tracking links
        .route("/links", post(create_link))
        .route("/links", get(list_links))
        .route("/links/:id/stats", get(link_stats))
        // Brand catalog
        .route("/brands", post(create_brand))
        .route("/products", post(create_product))
        .route("/campaigns", post(create_campaign))
        // Payouts
        .route("/payouts", post(request_payout))
        .route("/payouts", get(list_payouts))
        .route("/payouts/balance", get(get_balance))
        .route("/payouts/:id/cancel", post(cancel_payout))
        // Admin endpoints
        .route("/admin/users", post(create_user))
        .route("/admin/users", get(list_users))
        // Add middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.server_address).await?;
    info!("Server listening on {}", config.server_address);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Returns the current health status of all system components
async fn health_check(State(state): State<AppState>) -> AppResult<Json<ApiResponse<HealthResponse>>> {
    let db_status = state.database.health_check().await.is_ok();

    let response = HealthResponse {
        status: if db_status { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        services: ServiceStatus { database: db_status },
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Exposes the metrics snapshot for monitoring (admin only)
async fn get_metrics(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<MetricsSnapshot>>> {
    require_admin(&user)?;

    if !state.config.monitoring.enable_metrics {
        return Err(AppError::NotFound("Metrics are disabled".to_string()));
    }

    let snapshot = state.metrics.snapshot().await;
    Ok(Json(ApiResponse::success(snapshot)))
}

/// Exchanges an API key for a JWT session token
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let response = state.auth.login(&state.database, payload).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Records a click and redirects the visitor to the product page
async fn track_redirect(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Response> {
    let started = Instant::now();
    let redirect_url = state.attribution.record_click(&code).await?;
    state.metrics.record_latency("record_click", started.elapsed()).await;

    Ok((StatusCode::FOUND, [(header::LOCATION, redirect_url)]).into_response())
}

/// Records a click and returns the redirect target as JSON, for the
/// front-end redirect page
async fn track_click(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<ClickResponse>>> {
    let started = Instant::now();
    let redirect_url = state.attribution.record_click(&code).await?;
    state.metrics.record_latency("record_click", started.elapsed()).await;

    Ok(Json(ApiResponse::success(ClickResponse { redirect_url })))
}

/// Ingests a conversion reported by a brand integration
async fn record_conversion(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<RecordConversionRequest>,
) -> AppResult<Json<ApiResponse<Conversion>>> {
    let token = headers
        .get("x-integration-token")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing X-Integration-Token header".to_string()))?;

    state.attribution.authorize_integration(&payload.code, token).await?;

    let conversion = state.attribution.record_conversion(payload).await?;
    Ok(Json(ApiResponse::success(conversion)))
}

/// Lists the authenticated influencer's conversions
async fn list_conversions(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<PaginatedResponse<Conversion>>>> {
    require_role(&user, UserRole::Influencer)?;
    let conversions = state.attribution.list_conversions(user.id, pagination).await?;
    Ok(Json(ApiResponse::success(conversions)))
}

/// Applies a brand's (or admin's) review decision to a conversion
async fn review_conversion(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<ReviewConversionRequest>,
) -> AppResult<Json<ApiResponse<Conversion>>> {
    let conversion_id = parse_id(&id, "conversion")?;
    let conversion = state
        .attribution
        .review_conversion(&user, conversion_id, payload.approve)
        .await?;
    Ok(Json(ApiResponse::success(conversion)))
}

/// Creates a tracking link for the authenticated influencer
async fn create_link(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateLinkRequest>,
) -> AppResult<Json<ApiResponse<TrackingLink>>> {
    require_role(&user, UserRole::Influencer)?;
    let link = state.attribution.create_link(user.id, payload).await?;
    Ok(Json(ApiResponse::success(link)))
}

/// Lists the authenticated influencer's tracking links
async fn list_links(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Vec<TrackingLink>>>> {
    require_role(&user, UserRole::Influencer)?;
    let links = state.attribution.list_links(user.id, pagination).await?;
    Ok(Json(ApiResponse::success(links)))
}

/// Returns the denormalized counters for one of the influencer's links
async fn link_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<LinkStatsResponse>>> {
    require_role(&user, UserRole::Influencer)?;
    let link_id = parse_id(&id, "link")?;
    let stats = state.attribution.link_stats(user.id, link_id).await?;
    Ok(Json(ApiResponse::success(stats)))
}

/// Creates the brand profile for the authenticated brand user.
///
/// The integration token is revealed once in this response and redacted
/// everywhere afterwards.
async fn create_brand(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateBrandRequest>,
) -> AppResult<Json<ApiResponse<BrandCreatedResponse>>> {
    require_role(&user, UserRole::Brand)?;

    if state.database.get_brand_by_user(user.id).await?.is_some() {
        return Err(AppError::Conflict("Brand profile already exists".to_string()));
    }

    let integration_token = format!("itk_{}", Uuid::new_v4().simple());
    let brand = state
        .database
        .create_brand(user.id, payload, &integration_token)
        .await?;

    Ok(Json(ApiResponse::success(BrandCreatedResponse {
        brand,
        integration_token,
    })))
}

/// Lists a new product under the authenticated brand
async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateProductRequest>,
) -> AppResult<Json<ApiResponse<Product>>> {
    require_role(&user, UserRole::Brand)?;

    let brand = state
        .database
        .get_brand_by_user(user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Brand profile not found".to_string()))?;

    let product = state.database.create_product(brand.id, payload).await?;
    Ok(Json(ApiResponse::success(product)))
}

/// Creates a campaign under the authenticated brand
async fn create_campaign(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateCampaignRequest>,
) -> AppResult<Json<ApiResponse<Campaign>>> {
    require_role(&user, UserRole::Brand)?;

    let brand = state
        .database
        .get_brand_by_user(user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("Brand profile not found".to_string()))?;

    let campaign = state.database.create_campaign(brand.id, payload).await?;
    Ok(Json(ApiResponse::success(campaign)))
}

/// Creates a payout request for the authenticated influencer
async fn request_payout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<PayoutRequest>,
) -> AppResult<Json<ApiResponse<Payout>>> {
    require_role(&user, UserRole::Influencer)?;
    let payout = state.payouts.request_payout(user.id, payload).await?;
    Ok(Json(ApiResponse::success(payout)))
}

/// Lists the authenticated influencer's payouts
async fn list_payouts(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Vec<Payout>>>> {
    require_role(&user, UserRole::Influencer)?;
    let payouts = state.payouts.list_payouts(user.id, pagination).await?;
    Ok(Json(ApiResponse::success(payouts)))
}

/// Returns the influencer's balance breakdown
async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<BalanceResponse>>> {
    require_role(&user, UserRole::Influencer)?;
    let balance = state.payouts.get_balance(user.id).await?;
    Ok(Json(ApiResponse::success(balance)))
}

/// Cancels one of the influencer's pending payouts
async fn cancel_payout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<Payout>>> {
    require_role(&user, UserRole::Influencer)?;
    let payout_id = parse_id(&id, "payout")?;
    let payout = state.payouts.cancel_payout(user.id, payout_id).await?;
    Ok(Json(ApiResponse::success(payout)))
}

/// Admin endpoint to create a user account with a role
async fn create_user(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    require_admin(&user)?;
    let created = state.database.create_user(payload).await?;
    Ok(Json(ApiResponse::success(created)))
}

/// Admin endpoint to retrieve a paginated list of all users
async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(pagination): Query<Pagination>,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    require_admin(&user)?;
    let users = state.database.list_users(pagination).await?;
    Ok(Json(ApiResponse::success(users)))
}

/// Parses a path segment as a UUID with a readable error
fn parse_id(raw: &str, entity: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("Invalid {} ID format", entity)))
}
