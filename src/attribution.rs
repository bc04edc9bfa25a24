//! Click attribution and conversion recording
//!
//! The attribution core: tracking-link creation, durable click recording
//! with last-click semantics, and conversion ingestion that attributes an
//! order back to the originating click within a bounded window and
//! snapshots the commission at recording time.

use crate::{
    config::Config,
    database::{Database, NewConversion},
    error::{AppError, AppResult},
    metrics::MetricsService,
    models::*,
    rates,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Attempts before giving up on generating a non-colliding share code
const CODE_GENERATION_ATTEMPTS: usize = 5;

/// Whether a conversion at `occurred_at` is still attributable to the
/// link's most recent click. The boundary itself is inside the window.
/// Last-click policy: a link with no recorded click attributes nothing.
pub fn within_attribution_window(
    last_clicked_at: Option<DateTime<Utc>>,
    occurred_at: DateTime<Utc>,
    window_days: i64,
) -> bool {
    match last_clicked_at {
        Some(clicked_at) => {
            occurred_at.signed_duration_since(clicked_at) <= chrono::Duration::days(window_days)
        }
        None => false,
    }
}

/// Core attribution service for links, clicks, and conversions
#[derive(Clone)]
pub struct AttributionService {
    database: Arc<Database>,
    config: Arc<Config>,
    metrics: Arc<MetricsService>,
}

impl AttributionService {
    /// Creates a new attribution service
    pub fn new(database: Arc<Database>, config: Arc<Config>, metrics: Arc<MetricsService>) -> Self {
        Self {
            database,
            config,
            metrics,
        }
    }

    // === Tracking links ===

    /// Creates a tracking link for an influencer.
    ///
    /// The campaign, when given, must belong to the same brand as the
    /// product; rate layering depends on that.
    pub async fn create_link(
        &self,
        influencer_id: Uuid,
        request: CreateLinkRequest,
    ) -> AppResult<TrackingLink> {
        let product = self
            .database
            .get_product_by_id(request.product_id)
            .await?
            .ok_or_else(|| crate::not_found_error!("Product not found"))?;

        if !product.is_active {
            return Err(crate::validation_error!("Product is not active"));
        }

        if let Some(campaign_id) = request.campaign_id {
            let campaign = self
                .database
                .get_campaign_by_id(campaign_id)
                .await?
                .ok_or_else(|| crate::not_found_error!("Campaign not found"))?;

            if campaign.brand_id != product.brand_id {
                return Err(crate::validation_error!(
                    "Campaign belongs to a different brand than the product"
                ));
            }
        }

        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let code = self.generate_code();
            if let Some(link) = self
                .database
                .insert_tracking_link(influencer_id, product.id, request.campaign_id, &code)
                .await?
            {
                info!("Created tracking link {} for influencer {}", link.code, influencer_id);
                return Ok(link);
            }
            debug!("Share code collision on {}, regenerating", code);
        }

        Err(crate::internal_error!(
            "Could not generate a unique share code"
        ))
    }

    /// Lists the influencer's links
    pub async fn list_links(
        &self,
        influencer_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<Vec<TrackingLink>> {
        Ok(self
            .database
            .list_links_by_influencer(influencer_id, pagination)
            .await?)
    }

    /// Returns the denormalized counters for a link the influencer owns
    pub async fn link_stats(&self, influencer_id: Uuid, link_id: Uuid) -> AppResult<LinkStatsResponse> {
        let link = self
            .database
            .get_link_by_id(link_id)
            .await?
            .filter(|l| l.influencer_id == influencer_id)
            .ok_or_else(|| crate::not_found_error!("Tracking link not found"))?;

        Ok(LinkStatsResponse {
            link_id: link.id,
            code: link.code,
            click_count: link.click_count,
            conversion_count: link.conversion_count,
            total_sales: link.total_sales,
            last_clicked_at: link.last_clicked_at,
        })
    }

    // === Clicks ===

    /// Records a click on a share code and returns the redirect target.
    ///
    /// The increment and last-click timestamp are one atomic storage
    /// statement; unknown or disabled codes surface as not found.
    pub async fn record_click(&self, code: &str) -> AppResult<String> {
        let redirect_url = self
            .database
            .record_click(code, Utc::now())
            .await?
            .ok_or_else(|| crate::not_found_error!("Tracking code not found"))?;

        self.metrics.increment_counter("clicks_recorded", 1).await;
        debug!("Recorded click on code {}", code);

        Ok(redirect_url)
    }

    // === Conversions ===

    /// Records a conversion reported by a brand integration.
    ///
    /// The order is attributed to the link's most recent click; stale
    /// clicks are rejected, and a repeated order id surfaces the existing
    /// conversion as an explicit duplicate instead of a second row.
    pub async fn record_conversion(&self, request: RecordConversionRequest) -> AppResult<Conversion> {
        if request.order_value <= rust_decimal::Decimal::ZERO {
            return Err(crate::validation_error!("Order value must be positive"));
        }
        if request.order_id.trim().is_empty() {
            return Err(crate::validation_error!("Order ID must not be empty"));
        }

        let link = self
            .database
            .get_link_by_code(&request.code)
            .await?
            .filter(|l| l.status == LinkStatus::Active)
            .ok_or_else(|| crate::not_found_error!("Tracking code not found"))?;

        let window_days = self.config.attribution.window_days;
        if !within_attribution_window(link.last_clicked_at, request.occurred_at, window_days) {
            self.metrics.increment_counter("conversions_expired", 1).await;
            return Err(AppError::AttributionExpired(format!(
                "No click on {} within the last {} days",
                link.code, window_days
            )));
        }

        let product = self
            .database
            .get_product_by_id(link.product_id)
            .await?
            .ok_or_else(|| crate::not_found_error!("Product not found"))?;
        let brand = self
            .database
            .get_brand_by_id(product.brand_id)
            .await?
            .ok_or_else(|| crate::not_found_error!("Brand not found"))?;
        let campaign = match link.campaign_id {
            Some(campaign_id) => self.database.get_campaign_by_id(campaign_id).await?,
            None => None,
        };

        let now = Utc::now();
        let rate = rates::resolve_rate(
            campaign.as_ref(),
            &product,
            &brand,
            self.config.attribution.default_commission_rate,
            now,
        )?;
        let commission = rates::commission_amount(request.order_value, rate);

        let status = if self.config.features.auto_approve_conversions {
            ConversionStatus::Approved
        } else {
            ConversionStatus::Pending
        };

        let inserted = self
            .database
            .insert_conversion(NewConversion {
                tracking_link_id: link.id,
                influencer_id: link.influencer_id,
                order_id: request.order_id.clone(),
                order_value: request.order_value,
                commission_rate: rate,
                commission_amount: commission,
                status,
                occurred_at: request.occurred_at,
            })
            .await?;

        match inserted {
            Some(conversion) => {
                self.metrics.increment_counter("conversions_recorded", 1).await;
                info!(
                    "Recorded conversion {} on link {}: order {} for {} ({} commission)",
                    conversion.id, link.code, conversion.order_id, conversion.order_value, commission
                );
                Ok(conversion)
            }
            None => {
                // The unique constraint fired; report the existing row
                self.metrics.increment_counter("conversions_duplicate", 1).await;
                let existing = self
                    .database
                    .get_conversion_by_link_and_order(link.id, &request.order_id)
                    .await?
                    .ok_or_else(|| crate::internal_error!("Duplicate conversion row vanished"))?;
                Err(AppError::Duplicate(format!(
                    "Order {} already recorded as conversion {}",
                    existing.order_id, existing.id
                )))
            }
        }
    }

    /// Verifies the integration token presented for a tracking code
    pub async fn authorize_integration(&self, code: &str, token: &str) -> AppResult<()> {
        let brand = self
            .database
            .get_brand_for_code(code)
            .await?
            .ok_or_else(|| crate::not_found_error!("Tracking code not found"))?;

        if brand.integration_token.expose() != token {
            return Err(crate::auth_error!("Invalid integration token"));
        }

        Ok(())
    }

    /// Lists an influencer's conversions
    pub async fn list_conversions(
        &self,
        influencer_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Conversion>> {
        Ok(self
            .database
            .list_conversions_by_influencer(influencer_id, pagination)
            .await?)
    }

    /// Applies a review decision to a pending conversion.
    ///
    /// Only the brand owning the product (or an admin) may review.
    /// Approval is a precondition for payout inclusion; rejection is
    /// terminal.
    pub async fn review_conversion(
        &self,
        reviewer: &crate::auth::AuthUser,
        conversion_id: Uuid,
        approve: bool,
    ) -> AppResult<Conversion> {
        let owner = self
            .database
            .get_conversion_brand_owner(conversion_id)
            .await?
            .ok_or_else(|| crate::not_found_error!("Conversion not found"))?;

        if reviewer.role != UserRole::Admin && reviewer.id != owner {
            return Err(crate::auth_error!(
                "Only the owning brand or an admin may review this conversion"
            ));
        }

        let updated = if approve {
            self.database.approve_conversion(conversion_id).await?
        } else {
            self.database.reject_conversion(conversion_id).await?
        };

        match updated {
            Some(conversion) => {
                info!(
                    "Conversion {} {} by {}",
                    conversion_id,
                    if approve { "approved" } else { "rejected" },
                    reviewer.id
                );
                Ok(conversion)
            }
            None => {
                let existing = self
                    .database
                    .get_conversion_by_id(conversion_id)
                    .await?
                    .ok_or_else(|| crate::not_found_error!("Conversion not found"))?;
                Err(crate::conflict_error!(format!(
                    "Conversion is {:?} and can no longer be reviewed",
                    existing.status
                )))
            }
        }
    }

    /// Generates a share code of the configured length
    fn generate_code(&self) -> String {
        let mut code = String::new();
        while code.len() < self.config.attribution.link_code_length {
            code.push_str(&Uuid::new_v4().simple().to_string());
        }
        code.truncate(self.config.attribution.link_code_length);
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn conversion_at_exact_window_boundary_is_accepted() {
        let clicked = Utc::now();
        let occurred = clicked + Duration::days(30);

        assert!(within_attribution_window(Some(clicked), occurred, 30));
    }

    #[test]
    fn conversion_one_second_past_window_is_rejected() {
        let clicked = Utc::now();
        let occurred = clicked + Duration::days(30) + Duration::seconds(1);

        assert!(!within_attribution_window(Some(clicked), occurred, 30));
    }

    #[test]
    fn conversion_without_any_click_is_rejected() {
        assert!(!within_attribution_window(None, Utc::now(), 30));
    }

    #[test]
    fn conversion_before_the_click_is_within_window() {
        // Clock skew between shop and tracker must not reject the sale
        let clicked = Utc::now();
        let occurred = clicked - Duration::minutes(5);

        assert!(within_attribution_window(Some(clicked), occurred, 30));
    }
}
