//! Database operations and connection management
//!
//! Provides the storage layer for the Brandreach platform, handling
//! PostgreSQL connections, migrations, and all reads/writes for users,
//! brand catalogs, tracking links, conversions, and payouts. The
//! operations that guard correctness under concurrency (atomic click
//! counting, idempotent conversion inserts, payout attachment) live here
//! so application code never does read-modify-write on shared rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    FromRow, PgExecutor, Postgres, Transaction,
};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::models::*;

const USER_COLUMNS: &str =
    "id, email, username, api_key, role, is_active, last_login, created_at, updated_at";
const BRAND_COLUMNS: &str =
    "id, user_id, display_name, default_commission_rate, integration_token, created_at, updated_at";
const PRODUCT_COLUMNS: &str =
    "id, brand_id, name, product_url, commission_rate, is_active, created_at, updated_at";
const CAMPAIGN_COLUMNS: &str =
    "id, brand_id, name, commission_rate, is_active, starts_at, ends_at, created_at, updated_at";
const LINK_COLUMNS: &str = "id, influencer_id, product_id, campaign_id, code, status, click_count, \
     conversion_count, total_sales, last_clicked_at, created_at, updated_at";
const CONVERSION_COLUMNS: &str = "id, tracking_link_id, influencer_id, order_id, order_value, \
     commission_rate, commission_amount, status, occurred_at, approved_at, rejected_at, paid_at, \
     payout_id, created_at, updated_at";
const PAYOUT_COLUMNS: &str = "id, influencer_id, amount, status, method, payment_details, notes, \
     requested_at, processed_at, failure_reason, provider_reference, created_at, updated_at";

/// Fields of a conversion about to be recorded
#[derive(Debug, Clone)]
pub struct NewConversion {
    pub tracking_link_id: Uuid,
    pub influencer_id: Uuid,
    pub order_id: String,
    pub order_value: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub status: ConversionStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Approved conversion eligible for payout attachment
#[derive(Debug, Clone, FromRow)]
pub struct ConversionClaim {
    pub id: Uuid,
    pub commission_amount: Decimal,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Main database service with connection pooling
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Creates a new database connection with optimized pool settings
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        info!("Connected to database with {} max connections", max_connections);

        Ok(Self { pool })
    }

    /// Runs pending database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Verifies database connectivity
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;
        Ok(())
    }

    /// Returns the underlying connection pool for advanced operations
    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Starts a database transaction for atomic operations
    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.context("Failed to begin transaction")
    }

    // === User management ===

    /// Creates a new user account with auto-generated API key
    pub async fn create_user(&self, request: CreateUserRequest) -> Result<User> {
        let api_key = format!("brk_{}", Uuid::new_v4().simple());
        let now = Utc::now();

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, username, api_key, role, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&request.email)
        .bind(&request.username)
        .bind(&api_key)
        .bind(request.role)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create user")?;

        info!("Created user with ID: {}", user.id);
        Ok(user)
    }

    /// Retrieves user by their unique ID
    pub async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get user by ID")?;

        Ok(user)
    }

    /// Finds an active user by their API key for authentication
    pub async fn get_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE api_key = $1 AND is_active = true"
        ))
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get user by API key")?;

        Ok(user)
    }

    /// Updates the last login timestamp for a user
    pub async fn update_user_last_login(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to update user last login")?;

        Ok(())
    }

    /// Lists all users with pagination support
    pub async fn list_users(&self, pagination: Pagination) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(pagination.limit.unwrap_or(100))
        .bind(pagination.offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        Ok(users)
    }

    // === Brand catalog ===

    /// Creates a brand profile for a user
    pub async fn create_brand(
        &self,
        user_id: Uuid,
        request: CreateBrandRequest,
        integration_token: &str,
    ) -> Result<Brand> {
        let now = Utc::now();

        let brand = sqlx::query_as::<_, Brand>(&format!(
            r#"
            INSERT INTO brands (user_id, display_name, default_commission_rate, integration_token,
                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {BRAND_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&request.display_name)
        .bind(request.default_commission_rate)
        .bind(integration_token)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create brand")?;

        info!("Created brand profile: {} (ID: {})", brand.display_name, brand.id);
        Ok(brand)
    }

    /// Retrieves brand details by ID
    pub async fn get_brand_by_id(&self, brand_id: Uuid) -> Result<Option<Brand>> {
        let brand = sqlx::query_as::<_, Brand>(&format!(
            "SELECT {BRAND_COLUMNS} FROM brands WHERE id = $1"
        ))
        .bind(brand_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get brand by ID")?;

        Ok(brand)
    }

    /// Finds the brand profile owned by a user
    pub async fn get_brand_by_user(&self, user_id: Uuid) -> Result<Option<Brand>> {
        let brand = sqlx::query_as::<_, Brand>(&format!(
            "SELECT {BRAND_COLUMNS} FROM brands WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get brand by user")?;

        Ok(brand)
    }

    /// Resolves the brand behind a tracking code, for integration auth
    pub async fn get_brand_for_code(&self, code: &str) -> Result<Option<Brand>> {
        let brand = sqlx::query_as::<_, Brand>(
            r#"
            SELECT b.id, b.user_id, b.display_name, b.default_commission_rate,
                   b.integration_token, b.created_at, b.updated_at
            FROM tracking_links tl
            JOIN products p ON p.id = tl.product_id
            JOIN brands b ON b.id = p.brand_id
            WHERE tl.code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get brand for tracking code")?;

        Ok(brand)
    }

    /// Lists a new product under a brand
    pub async fn create_product(&self, brand_id: Uuid, request: CreateProductRequest) -> Result<Product> {
        let now = Utc::now();

        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (brand_id, name, product_url, commission_rate, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(brand_id)
        .bind(&request.name)
        .bind(&request.product_url)
        .bind(request.commission_rate)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create product")?;

        info!("Created product: {} (ID: {})", product.name, product.id);
        Ok(product)
    }

    /// Retrieves product details by ID
    pub async fn get_product_by_id(&self, product_id: Uuid) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get product by ID")?;

        Ok(product)
    }

    /// Creates a campaign under a brand
    pub async fn create_campaign(&self, brand_id: Uuid, request: CreateCampaignRequest) -> Result<Campaign> {
        let now = Utc::now();

        let campaign = sqlx::query_as::<_, Campaign>(&format!(
            r#"
            INSERT INTO campaigns (brand_id, name, commission_rate, starts_at, ends_at,
                                   created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {CAMPAIGN_COLUMNS}
            "#
        ))
        .bind(brand_id)
        .bind(&request.name)
        .bind(request.commission_rate)
        .bind(request.starts_at)
        .bind(request.ends_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create campaign")?;

        info!("Created campaign: {} (ID: {})", campaign.name, campaign.id);
        Ok(campaign)
    }

    /// Retrieves campaign details by ID
    pub async fn get_campaign_by_id(&self, campaign_id: Uuid) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1"
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get campaign by ID")?;

        Ok(campaign)
    }

    // === Tracking links ===

    /// Inserts a tracking link; returns None when the code collides
    pub async fn insert_tracking_link(
        &self,
        influencer_id: Uuid,
        product_id: Uuid,
        campaign_id: Option<Uuid>,
        code: &str,
    ) -> Result<Option<TrackingLink>> {
        let now = Utc::now();

        let link = sqlx::query_as::<_, TrackingLink>(&format!(
            r#"
            INSERT INTO tracking_links (influencer_id, product_id, campaign_id, code,
                                        created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (code) DO NOTHING
            RETURNING {LINK_COLUMNS}
            "#
        ))
        .bind(influencer_id)
        .bind(product_id)
        .bind(campaign_id)
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to insert tracking link")?;

        Ok(link)
    }

    /// Looks up a tracking link by its share code
    pub async fn get_link_by_code(&self, code: &str) -> Result<Option<TrackingLink>> {
        let link = sqlx::query_as::<_, TrackingLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracking_links WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get link by code")?;

        Ok(link)
    }

    /// Retrieves a tracking link by ID
    pub async fn get_link_by_id(&self, link_id: Uuid) -> Result<Option<TrackingLink>> {
        let link = sqlx::query_as::<_, TrackingLink>(&format!(
            "SELECT {LINK_COLUMNS} FROM tracking_links WHERE id = $1"
        ))
        .bind(link_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get link by ID")?;

        Ok(link)
    }

    /// Lists an influencer's tracking links, newest first
    pub async fn list_links_by_influencer(
        &self,
        influencer_id: Uuid,
        pagination: Pagination,
    ) -> Result<Vec<TrackingLink>> {
        let links = sqlx::query_as::<_, TrackingLink>(&format!(
            r#"
            SELECT {LINK_COLUMNS}
            FROM tracking_links
            WHERE influencer_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(influencer_id)
        .bind(pagination.limit.unwrap_or(50))
        .bind(pagination.offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tracking links")?;

        Ok(links)
    }

    /// Records a click in a single atomic statement.
    ///
    /// The counter increment and last-click timestamp happen inside the
    /// UPDATE itself so simultaneous visitors never lose updates. Returns
    /// the product URL for redirection, or None when the code is unknown,
    /// the link is disabled, or the product has been delisted.
    pub async fn record_click(&self, code: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let redirect_url = sqlx::query_scalar::<_, String>(
            r#"
            UPDATE tracking_links AS tl
            SET click_count = tl.click_count + 1,
                last_clicked_at = $2,
                updated_at = $2
            FROM products AS p
            WHERE tl.code = $1
              AND tl.status = 'active'
              AND p.id = tl.product_id
              AND p.is_active = true
            RETURNING p.product_url
            "#,
        )
        .bind(code)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to record click")?;

        Ok(redirect_url)
    }

    // === Conversions ===

    /// Inserts a conversion and bumps the link's denormalized counters.
    ///
    /// Idempotence rides on the (tracking_link_id, order_id) unique
    /// constraint: a duplicate insert returns None without touching the
    /// counters, and the caller decides how to surface it.
    pub async fn insert_conversion(&self, new: NewConversion) -> Result<Option<Conversion>> {
        let now = Utc::now();
        let approved_at = match new.status {
            ConversionStatus::Approved => Some(now),
            _ => None,
        };

        let mut tx = self.begin_transaction().await?;

        let conversion = sqlx::query_as::<_, Conversion>(&format!(
            r#"
            INSERT INTO conversions (tracking_link_id, influencer_id, order_id, order_value,
                                     commission_rate, commission_amount, status, occurred_at,
                                     approved_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
            ON CONFLICT (tracking_link_id, order_id) DO NOTHING
            RETURNING {CONVERSION_COLUMNS}
            "#
        ))
        .bind(new.tracking_link_id)
        .bind(new.influencer_id)
        .bind(&new.order_id)
        .bind(new.order_value)
        .bind(new.commission_rate)
        .bind(new.commission_amount)
        .bind(new.status)
        .bind(new.occurred_at)
        .bind(approved_at)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to insert conversion")?;

        if let Some(ref conversion) = conversion {
            sqlx::query(
                r#"
                UPDATE tracking_links
                SET conversion_count = conversion_count + 1,
                    total_sales = total_sales + $2,
                    updated_at = $3
                WHERE id = $1
                "#,
            )
            .bind(conversion.tracking_link_id)
            .bind(conversion.order_value)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to update link conversion counters")?;
        }

        tx.commit().await.context("Failed to commit conversion")?;

        Ok(conversion)
    }

    /// Retrieves a conversion by ID
    pub async fn get_conversion_by_id(&self, conversion_id: Uuid) -> Result<Option<Conversion>> {
        let conversion = sqlx::query_as::<_, Conversion>(&format!(
            "SELECT {CONVERSION_COLUMNS} FROM conversions WHERE id = $1"
        ))
        .bind(conversion_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get conversion by ID")?;

        Ok(conversion)
    }

    /// Finds the existing conversion for a (link, order) pair
    pub async fn get_conversion_by_link_and_order(
        &self,
        tracking_link_id: Uuid,
        order_id: &str,
    ) -> Result<Option<Conversion>> {
        let conversion = sqlx::query_as::<_, Conversion>(&format!(
            "SELECT {CONVERSION_COLUMNS} FROM conversions WHERE tracking_link_id = $1 AND order_id = $2"
        ))
        .bind(tracking_link_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get conversion by link and order")?;

        Ok(conversion)
    }

    /// Lists an influencer's conversions with a total count
    pub async fn list_conversions_by_influencer(
        &self,
        influencer_id: Uuid,
        pagination: Pagination,
    ) -> Result<PaginatedResponse<Conversion>> {
        let limit = pagination.limit.unwrap_or(50);
        let offset = pagination.offset.unwrap_or(0);

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversions WHERE influencer_id = $1")
                .bind(influencer_id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to count conversions")?;

        let conversions = sqlx::query_as::<_, Conversion>(&format!(
            r#"
            SELECT {CONVERSION_COLUMNS}
            FROM conversions
            WHERE influencer_id = $1
            ORDER BY occurred_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(influencer_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list conversions")?;

        Ok(PaginatedResponse::new(conversions, total, limit, offset))
    }

    /// Resolves which user owns the brand behind a conversion's product
    pub async fn get_conversion_brand_owner(&self, conversion_id: Uuid) -> Result<Option<Uuid>> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT b.user_id
            FROM conversions c
            JOIN tracking_links tl ON tl.id = c.tracking_link_id
            JOIN products p ON p.id = tl.product_id
            JOIN brands b ON b.id = p.brand_id
            WHERE c.id = $1
            "#,
        )
        .bind(conversion_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve conversion brand owner")?;

        Ok(owner)
    }

    /// Moves a pending conversion to approved; None when it is not pending
    pub async fn approve_conversion(&self, conversion_id: Uuid) -> Result<Option<Conversion>> {
        let now = Utc::now();

        let conversion = sqlx::query_as::<_, Conversion>(&format!(
            r#"
            UPDATE conversions
            SET status = 'approved', approved_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {CONVERSION_COLUMNS}
            "#
        ))
        .bind(conversion_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to approve conversion")?;

        Ok(conversion)
    }

    /// Moves a pending conversion to rejected (terminal); None when not pending
    pub async fn reject_conversion(&self, conversion_id: Uuid) -> Result<Option<Conversion>> {
        let now = Utc::now();

        let conversion = sqlx::query_as::<_, Conversion>(&format!(
            r#"
            UPDATE conversions
            SET status = 'rejected', rejected_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {CONVERSION_COLUMNS}
            "#
        ))
        .bind(conversion_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to reject conversion")?;

        Ok(conversion)
    }

    // === Balance components ===
    //
    // Balance sums take an explicit executor so the payout transaction can
    // re-evaluate them under its advisory lock.

    /// Total commission over the influencer's approved conversions
    pub async fn approved_conversions_total(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
    ) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(commission_amount), 0) FROM conversions \
             WHERE influencer_id = $1 AND status = 'approved'",
        )
        .bind(influencer_id)
        .fetch_one(executor)
        .await
        .context("Failed to sum approved conversions")?;

        Ok(total)
    }

    /// Total commission over conversions still awaiting review
    pub async fn pending_conversions_total(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
    ) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(commission_amount), 0) FROM conversions \
             WHERE influencer_id = $1 AND status = 'pending'",
        )
        .bind(influencer_id)
        .fetch_one(executor)
        .await
        .context("Failed to sum pending conversions")?;

        Ok(total)
    }

    /// Total commission already settled through completed payouts
    pub async fn paid_conversions_total(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
    ) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(commission_amount), 0) FROM conversions \
             WHERE influencer_id = $1 AND status = 'paid'",
        )
        .bind(influencer_id)
        .fetch_one(executor)
        .await
        .context("Failed to sum paid conversions")?;

        Ok(total)
    }

    /// Total amount reserved by the influencer's in-flight payouts
    pub async fn reserved_payouts_total(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
    ) -> Result<Decimal> {
        let total = sqlx::query_scalar::<_, Decimal>(
            "SELECT COALESCE(SUM(amount), 0) FROM payouts \
             WHERE influencer_id = $1 AND status IN ('pending', 'processing')",
        )
        .bind(influencer_id)
        .fetch_one(executor)
        .await
        .context("Failed to sum reserved payouts")?;

        Ok(total)
    }

    // === Payouts ===

    /// Takes the per-influencer advisory lock for the current transaction.
    ///
    /// Serializes concurrent payout requests for one influencer; released
    /// automatically at commit or rollback.
    pub async fn lock_influencer(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(influencer_id)
            .execute(executor)
            .await
            .context("Failed to acquire influencer payout lock")?;

        Ok(())
    }

    /// Locks and returns the influencer's approved, unattached conversions,
    /// oldest approval first
    pub async fn claimable_conversions(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
    ) -> Result<Vec<ConversionClaim>> {
        let claims = sqlx::query_as::<_, ConversionClaim>(
            r#"
            SELECT id, commission_amount, approved_at, created_at
            FROM conversions
            WHERE influencer_id = $1 AND status = 'approved' AND payout_id IS NULL
            ORDER BY approved_at ASC NULLS LAST, created_at ASC
            FOR UPDATE
            "#,
        )
        .bind(influencer_id)
        .fetch_all(executor)
        .await
        .context("Failed to load claimable conversions")?;

        Ok(claims)
    }

    /// Inserts a pending payout row
    pub async fn insert_payout(
        &self,
        executor: impl PgExecutor<'_>,
        influencer_id: Uuid,
        request: &PayoutRequest,
        now: DateTime<Utc>,
    ) -> Result<Payout> {
        let payout = sqlx::query_as::<_, Payout>(&format!(
            r#"
            INSERT INTO payouts (influencer_id, amount, status, method, payment_details, notes,
                                 requested_at, created_at, updated_at)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, $6, $6)
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(influencer_id)
        .bind(request.amount)
        .bind(request.method)
        .bind(&request.payment_details)
        .bind(&request.notes)
        .bind(now)
        .fetch_one(executor)
        .await
        .context("Failed to insert payout")?;

        Ok(payout)
    }

    /// Attaches conversions to a payout, re-checking that none were
    /// claimed since they were selected. Returns the number attached;
    /// a shortfall means a concurrent writer won the race.
    pub async fn attach_conversions(
        &self,
        executor: impl PgExecutor<'_>,
        payout_id: Uuid,
        conversion_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE conversions
            SET payout_id = $1, updated_at = $3
            WHERE id = ANY($2) AND payout_id IS NULL AND status = 'approved'
            "#,
        )
        .bind(payout_id)
        .bind(conversion_ids)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to attach conversions to payout")?;

        Ok(result.rows_affected())
    }

    /// Retrieves a payout by ID
    pub async fn get_payout_by_id(&self, payout_id: Uuid) -> Result<Option<Payout>> {
        let payout = sqlx::query_as::<_, Payout>(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts WHERE id = $1"
        ))
        .bind(payout_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get payout by ID")?;

        Ok(payout)
    }

    /// Lists an influencer's payouts, newest first
    pub async fn list_payouts_by_influencer(
        &self,
        influencer_id: Uuid,
        pagination: Pagination,
    ) -> Result<Vec<Payout>> {
        let payouts = sqlx::query_as::<_, Payout>(&format!(
            r#"
            SELECT {PAYOUT_COLUMNS}
            FROM payouts
            WHERE influencer_id = $1
            ORDER BY requested_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(influencer_id)
        .bind(pagination.limit.unwrap_or(50))
        .bind(pagination.offset.unwrap_or(0))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list payouts")?;

        Ok(payouts)
    }

    /// IDs of the conversions a payout settles
    pub async fn payout_conversion_ids(&self, payout_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM conversions WHERE payout_id = $1 ORDER BY approved_at ASC",
        )
        .bind(payout_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list payout conversions")?;

        Ok(ids)
    }

    /// Cancels a pending payout owned by the influencer and releases its
    /// conversions back to the unattached pool. None when the payout does
    /// not exist, is not theirs, or has already left pending.
    pub async fn cancel_pending_payout(
        &self,
        payout_id: Uuid,
        influencer_id: Uuid,
    ) -> Result<Option<Payout>> {
        let now = Utc::now();
        let mut tx = self.begin_transaction().await?;

        let payout = sqlx::query_as::<_, Payout>(&format!(
            r#"
            UPDATE payouts
            SET status = 'cancelled', updated_at = $3
            WHERE id = $1 AND influencer_id = $2 AND status = 'pending'
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(payout_id)
        .bind(influencer_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to cancel payout")?;

        if payout.is_some() {
            sqlx::query(
                "UPDATE conversions SET payout_id = NULL, updated_at = $2 WHERE payout_id = $1",
            )
            .bind(payout_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to release cancelled payout conversions")?;
        }

        tx.commit().await.context("Failed to commit payout cancellation")?;

        Ok(payout)
    }

    /// Atomically claims the oldest pending payout for processing.
    ///
    /// SKIP LOCKED keeps multiple workers from double-processing.
    pub async fn claim_next_pending_payout(&self) -> Result<Option<Payout>> {
        let payout = sqlx::query_as::<_, Payout>(&format!(
            r#"
            UPDATE payouts
            SET status = 'processing', updated_at = $1
            WHERE id = (
                SELECT id FROM payouts
                WHERE status = 'pending'
                ORDER BY requested_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {PAYOUT_COLUMNS}
            "#
        ))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to claim pending payout")?;

        Ok(payout)
    }

    /// Marks a processing payout completed and settles its conversions
    /// as paid. Returns false when the payout was not in processing.
    pub async fn complete_payout(&self, payout_id: Uuid, provider_reference: &str) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.begin_transaction().await?;

        let updated = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'completed', processed_at = $2, provider_reference = $3, updated_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(payout_id)
        .bind(now)
        .bind(provider_reference)
        .execute(&mut *tx)
        .await
        .context("Failed to complete payout")?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE conversions
            SET status = 'paid', paid_at = $2, updated_at = $2
            WHERE payout_id = $1 AND status = 'approved'
            "#,
        )
        .bind(payout_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to settle payout conversions")?;

        tx.commit().await.context("Failed to commit payout completion")?;

        Ok(true)
    }

    /// Marks a processing payout failed and releases its conversions.
    /// Returns false when the payout was not in processing.
    pub async fn fail_payout(&self, payout_id: Uuid, reason: &str) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.begin_transaction().await?;

        let updated = sqlx::query(
            r#"
            UPDATE payouts
            SET status = 'failed', failure_reason = $3, processed_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(payout_id)
        .bind(now)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .context("Failed to mark payout failed")?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE conversions SET payout_id = NULL, updated_at = $2 WHERE payout_id = $1 AND status = 'approved'",
        )
        .bind(payout_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to release failed payout conversions")?;

        tx.commit().await.context("Failed to commit payout failure")?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn setup_test_db() -> Database {
        let config = Config::load().unwrap();
        let db = Database::new(&config.database_url, 2).await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    async fn seed_link(db: &Database) -> (User, TrackingLink) {
        let suffix = Uuid::new_v4().simple().to_string();

        let brand_user = db
            .create_user(CreateUserRequest {
                email: format!("brand-{suffix}@example.com"),
                username: None,
                role: UserRole::Brand,
            })
            .await
            .unwrap();

        let brand = db
            .create_brand(
                brand_user.id,
                CreateBrandRequest {
                    display_name: "Acme".to_string(),
                    default_commission_rate: Some(Decimal::new(8, 2)),
                },
                &format!("itk_{suffix}"),
            )
            .await
            .unwrap();

        let product = db
            .create_product(
                brand.id,
                CreateProductRequest {
                    name: "Walnut desk".to_string(),
                    product_url: "https://shop.acme.test/desk".to_string(),
                    commission_rate: Some(Decimal::new(10, 2)),
                },
            )
            .await
            .unwrap();

        let influencer = db
            .create_user(CreateUserRequest {
                email: format!("influencer-{suffix}@example.com"),
                username: None,
                role: UserRole::Influencer,
            })
            .await
            .unwrap();

        let link = db
            .insert_tracking_link(influencer.id, product.id, None, &suffix[..8])
            .await
            .unwrap()
            .expect("fresh code should not collide");

        (influencer, link)
    }

    #[tokio::test]
    #[ignore] // Requires database connection
    async fn test_click_recording_is_atomic_and_returns_url() {
        let db = setup_test_db().await;
        let (_, link) = seed_link(&db).await;

        let url = db.record_click(&link.code, Utc::now()).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://shop.acme.test/desk"));

        let url = db.record_click(&link.code, Utc::now()).await.unwrap();
        assert!(url.is_some());

        let reloaded = db.get_link_by_code(&link.code).await.unwrap().unwrap();
        assert_eq!(reloaded.click_count, 2);
        assert!(reloaded.last_clicked_at.is_some());

        // Unknown codes record nothing
        let missing = db.record_click("nope1234", Utc::now()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    #[ignore] // Requires database connection
    async fn test_conversion_insert_is_idempotent() {
        let db = setup_test_db().await;
        let (influencer, link) = seed_link(&db).await;

        let new = NewConversion {
            tracking_link_id: link.id,
            influencer_id: influencer.id,
            order_id: "ORD-1001".to_string(),
            order_value: Decimal::new(10000, 2),
            commission_rate: Decimal::new(10, 2),
            commission_amount: Decimal::new(1000, 2),
            status: ConversionStatus::Pending,
            occurred_at: Utc::now(),
        };

        let first = db.insert_conversion(new.clone()).await.unwrap();
        assert!(first.is_some());

        let second = db.insert_conversion(new).await.unwrap();
        assert!(second.is_none());

        let reloaded = db.get_link_by_code(&link.code).await.unwrap().unwrap();
        assert_eq!(reloaded.conversion_count, 1);
        assert_eq!(reloaded.total_sales, Decimal::new(10000, 2));
    }
}
