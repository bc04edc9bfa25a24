//! Database models and schema definitions
//!
//! Complete data model for the Brandreach marketplace: users and roles,
//! brand catalogs (products and campaigns), influencer tracking links,
//! attributed conversions, and payouts. All models are designed for
//! PostgreSQL with proper serialization support; every monetary value is
//! a `rust_decimal::Decimal`, never a float.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

use crate::secret::Secret;

// User accounts and roles

/// Core user entity with API-key based authentication
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: Option<String>,
    pub api_key: String,
    pub role: UserRole,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Platform roles with distinct permissions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Brand,
    Influencer,
    Admin,
}

/// Request payload for creating new user accounts (admin only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub username: Option<String>,
    pub role: UserRole,
}

// Brand catalog

/// Brand profile owning products and campaigns
///
/// The integration token authenticates conversion ingestion from the
/// brand's shop; it is stored wrapped so every read surface masks it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Brand {
    pub id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub default_commission_rate: Option<Decimal>,
    pub integration_token: Secret<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for creating a brand profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBrandRequest {
    pub display_name: String,
    pub default_commission_rate: Option<Decimal>,
}

/// Returned once at creation time; the only surface exposing the token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandCreatedResponse {
    pub brand: Brand,
    pub integration_token: String,
}

/// Product listed by a brand
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub product_url: String,
    pub commission_rate: Option<Decimal>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for listing a new product
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub product_url: String,
    pub commission_rate: Option<Decimal>,
}

/// Time-bounded promotion with an optional commission-rate override
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    pub commission_rate: Option<Decimal>,
    pub is_active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Whether the campaign is running at `now` (flag and date window)
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.starts_at.map_or(true, |starts| now >= starts)
            && self.ends_at.map_or(true, |ends| now <= ends)
    }
}

/// Request payload for creating a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub commission_rate: Option<Decimal>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

// Tracking links

/// Lifecycle of a tracking link; links are never hard-deleted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "link_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Disabled,
}

/// Influencer tracking link mapping a share code to a product
///
/// click_count, conversion_count, and total_sales are denormalized
/// aggregates updated on each event. last_clicked_at carries last-click
/// attribution: only the most recent click opens the window for the
/// next conversion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrackingLink {
    pub id: Uuid,
    pub influencer_id: Uuid,
    pub product_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub code: String,
    pub status: LinkStatus,
    pub click_count: i64,
    pub conversion_count: i64,
    pub total_sales: Decimal,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for creating a tracking link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLinkRequest {
    pub product_id: Uuid,
    pub campaign_id: Option<Uuid>,
}

/// Denormalized counters for a link's dashboard card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkStatsResponse {
    pub link_id: Uuid,
    pub code: String,
    pub click_count: i64,
    pub conversion_count: i64,
    pub total_sales: Decimal,
    pub last_clicked_at: Option<DateTime<Utc>>,
}

/// Response body for the JSON click endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickResponse {
    pub redirect_url: String,
}

// Conversions

/// Payout-facing lifecycle of an attributed conversion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "conversion_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

/// Conversion attributed to a tracking-link click
///
/// commission_rate and commission_amount are snapshotted at recording
/// time and never recomputed; only status, its timestamps, and the
/// payout claim change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversion {
    pub id: Uuid,
    pub tracking_link_id: Uuid,
    pub influencer_id: Uuid,
    pub order_id: String,
    pub order_value: Decimal,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub status: ConversionStatus,
    pub occurred_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payout_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversion ingestion payload from a brand integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConversionRequest {
    pub code: String,
    pub order_id: String,
    pub order_value: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Review decision moving a pending conversion to approved or rejected
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConversionRequest {
    pub approve: bool,
}

// Payouts

/// Status of a payout in the settlement pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "payout_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Supported disbursement channels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "payout_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    BankTransfer,
    Paypal,
    Stripe,
}

/// Payout batching approved commissions for settlement
///
/// Claimed conversions point back via their payout_id; a conversion can
/// be claimed by at most one live payout.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payout {
    pub id: Uuid,
    pub influencer_id: Uuid,
    pub amount: Decimal,
    pub status: PayoutStatus,
    pub method: PayoutMethod,
    pub payment_details: serde_json::Value,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub provider_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for a payout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub payment_details: serde_json::Value,
    pub notes: Option<String>,
}

/// Balance breakdown for an influencer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceResponse {
    pub available_balance: Decimal,
    pub pending_conversions_total: Decimal,
    pub paid_total: Decimal,
    pub total_approved: Decimal,
}

// Authentication

/// Login request exchanging an API key for a JWT session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub api_key: String,
}

/// Successful login response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

// Pagination

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, limit: i64, offset: i64) -> Self {
        Self {
            data,
            total,
            limit,
            offset,
        }
    }
}

// Default implementations

impl Default for LinkStatus {
    fn default() -> Self {
        LinkStatus::Active
    }
}

impl Default for ConversionStatus {
    fn default() -> Self {
        ConversionStatus::Pending
    }
}

impl Default for PayoutStatus {
    fn default() -> Self {
        PayoutStatus::Pending
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: Some(50),
            offset: Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(is_active: bool, starts: Option<i64>, ends: Option<i64>) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            brand_id: Uuid::new_v4(),
            name: "spring-sale".to_string(),
            commission_rate: Some(Decimal::new(20, 2)),
            is_active,
            starts_at: starts.map(|d| now + chrono::Duration::days(d)),
            ends_at: ends.map(|d| now + chrono::Duration::days(d)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn campaign_liveness_respects_flag_and_window() {
        let now = Utc::now();
        assert!(campaign(true, None, None).is_live(now));
        assert!(campaign(true, Some(-1), Some(1)).is_live(now));
        assert!(!campaign(false, None, None).is_live(now));
        assert!(!campaign(true, Some(1), None).is_live(now));
        assert!(!campaign(true, None, Some(-1)).is_live(now));
    }

    #[test]
    fn brand_serialization_masks_integration_token() {
        let brand = Brand {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            display_name: "Acme".to_string(),
            default_commission_rate: Some(Decimal::new(8, 2)),
            integration_token: Secret::new("itk_123456".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_string(&brand).unwrap();
        assert!(!json.contains("itk_123456"));
        assert!(json.contains("[REDACTED]"));
    }
}
