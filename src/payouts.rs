//! Payout aggregation service
//!
//! Batches approved commissions into payout requests and guards against
//! double payment. All mutation of the claim set happens inside a single
//! transaction holding a per-influencer advisory lock, so two concurrent
//! requests can never spend the same conversion twice.

use crate::{
    database::{ConversionClaim, Database},
    error::{AppError, AppResult},
    metrics::MetricsService,
    models::*,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Core payout service handling balances, requests, and settlement
#[derive(Clone)]
pub struct PayoutService {
    database: Arc<Database>,
    metrics: Arc<MetricsService>,
}

/// Picks claims oldest-approval-first until their running total covers
/// `amount`. Returns None when the pool cannot cover it. The caller must
/// pass claims already sorted oldest-first.
pub(crate) fn select_oldest_covering(claims: &[ConversionClaim], amount: Decimal) -> Option<Vec<Uuid>> {
    let mut selected = Vec::new();
    let mut running = Decimal::ZERO;

    for claim in claims {
        if running >= amount {
            break;
        }
        selected.push(claim.id);
        running += claim.commission_amount;
    }

    if running >= amount {
        Some(selected)
    } else {
        None
    }
}

impl PayoutService {
    /// Creates a new payout service
    pub fn new(database: Arc<Database>, metrics: Arc<MetricsService>) -> Self {
        Self { database, metrics }
    }

    /// Computes the influencer's balance breakdown.
    ///
    /// available = approved commissions minus amounts reserved by in-flight
    /// payouts. Conversions claimed by a pending payout still count as
    /// approved here because that payout's full amount is already
    /// subtracted; excluding both sides would double-count the overlap.
    pub async fn get_balance(&self, influencer_id: Uuid) -> AppResult<BalanceResponse> {
        let pool = self.database.get_pool();

        let total_approved = self
            .database
            .approved_conversions_total(pool, influencer_id)
            .await?;
        let reserved = self
            .database
            .reserved_payouts_total(pool, influencer_id)
            .await?;
        let pending_conversions_total = self
            .database
            .pending_conversions_total(pool, influencer_id)
            .await?;
        let paid_total = self
            .database
            .paid_conversions_total(pool, influencer_id)
            .await?;

        Ok(BalanceResponse {
            available_balance: total_approved - reserved,
            pending_conversions_total,
            paid_total,
            total_approved,
        })
    }

    /// Creates a payout request, attaching approved conversions to it.
    ///
    /// Balance validation, selection, and attachment all run inside one
    /// transaction under the influencer's advisory lock; the attach step
    /// re-checks every claim so a lost race surfaces as a conflict
    /// instead of a double payment.
    pub async fn request_payout(
        &self,
        influencer_id: Uuid,
        request: PayoutRequest,
    ) -> AppResult<Payout> {
        if request.amount <= Decimal::ZERO {
            return Err(crate::validation_error!("Payout amount must be positive"));
        }

        let mut tx = self.database.begin_transaction().await?;

        self.database.lock_influencer(&mut *tx, influencer_id).await?;

        let total_approved = self
            .database
            .approved_conversions_total(&mut *tx, influencer_id)
            .await?;
        let reserved = self
            .database
            .reserved_payouts_total(&mut *tx, influencer_id)
            .await?;
        let available = total_approved - reserved;

        if request.amount > available {
            return Err(AppError::InsufficientBalance(format!(
                "Requested {} but only {} is available",
                request.amount, available
            )));
        }

        let claims = self
            .database
            .claimable_conversions(&mut *tx, influencer_id)
            .await?;

        let selected = select_oldest_covering(&claims, request.amount).ok_or_else(|| {
            AppError::InsufficientBalance(format!(
                "Unattached approved conversions cannot cover {}",
                request.amount
            ))
        })?;

        let now = Utc::now();
        let payout = self
            .database
            .insert_payout(&mut *tx, influencer_id, &request, now)
            .await?;

        let attached = self
            .database
            .attach_conversions(&mut *tx, payout.id, &selected, now)
            .await?;

        if attached != selected.len() as u64 {
            // Rollback happens when the transaction drops
            warn!(
                "Payout attachment race lost for influencer {}: expected {}, attached {}",
                influencer_id,
                selected.len(),
                attached
            );
            return Err(crate::conflict_error!(
                "Concurrent payout request claimed the same conversions"
            ));
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(anyhow::Error::from(e).context("Failed to commit payout")))?;

        self.metrics.increment_counter("payouts_requested", 1).await;
        info!(
            "Payout {} created for influencer {}: {} across {} conversions",
            payout.id,
            influencer_id,
            payout.amount,
            selected.len()
        );

        Ok(payout)
    }

    /// Retrieves a payout, enforcing ownership
    pub async fn get_payout(&self, influencer_id: Uuid, payout_id: Uuid) -> AppResult<Payout> {
        let payout = self
            .database
            .get_payout_by_id(payout_id)
            .await?
            .filter(|p| p.influencer_id == influencer_id)
            .ok_or_else(|| crate::not_found_error!("Payout not found"))?;

        Ok(payout)
    }

    /// Lists the influencer's payouts
    pub async fn list_payouts(
        &self,
        influencer_id: Uuid,
        pagination: Pagination,
    ) -> AppResult<Vec<Payout>> {
        let payouts = self
            .database
            .list_payouts_by_influencer(influencer_id, pagination)
            .await?;

        Ok(payouts)
    }

    /// Cancels a pending payout, releasing its conversions back to the
    /// unattached pool. Only the owner may cancel, and only while pending.
    pub async fn cancel_payout(&self, influencer_id: Uuid, payout_id: Uuid) -> AppResult<Payout> {
        match self
            .database
            .cancel_pending_payout(payout_id, influencer_id)
            .await?
        {
            Some(payout) => {
                self.metrics.increment_counter("payouts_cancelled", 1).await;
                info!("Payout {} cancelled by influencer {}", payout_id, influencer_id);
                Ok(payout)
            }
            None => {
                // Distinguish an unknown payout from an invalid transition
                let existing = self.database.get_payout_by_id(payout_id).await?;
                match existing {
                    Some(p) if p.influencer_id == influencer_id => Err(crate::conflict_error!(
                        format!("Payout is {:?} and can no longer be cancelled", p.status)
                    )),
                    _ => Err(crate::not_found_error!("Payout not found")),
                }
            }
        }
    }

    // === Worker-side transitions ===

    /// Claims the oldest pending payout, moving it to processing
    pub async fn claim_next_pending(&self) -> AppResult<Option<Payout>> {
        Ok(self.database.claim_next_pending_payout().await?)
    }

    /// Marks a processing payout completed and its conversions paid
    pub async fn complete_payout(&self, payout_id: Uuid, provider_reference: &str) -> AppResult<()> {
        let settled = self
            .database
            .complete_payout(payout_id, provider_reference)
            .await?;

        if !settled {
            return Err(crate::conflict_error!("Payout is not in processing"));
        }

        self.metrics.increment_counter("payouts_completed", 1).await;
        info!("Payout {} completed ({})", payout_id, provider_reference);
        Ok(())
    }

    /// Marks a processing payout failed and releases its conversions
    pub async fn fail_payout(&self, payout_id: Uuid, reason: &str) -> AppResult<()> {
        let released = self.database.fail_payout(payout_id, reason).await?;

        if !released {
            return Err(crate::conflict_error!("Payout is not in processing"));
        }

        self.metrics.increment_counter("payouts_failed", 1).await;
        warn!("Payout {} failed: {}", payout_id, reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn claim(amount: i64, approved_days_ago: i64) -> ConversionClaim {
        let now = Utc::now();
        ConversionClaim {
            id: Uuid::new_v4(),
            commission_amount: Decimal::new(amount, 2),
            approved_at: Some(now - Duration::days(approved_days_ago)),
            created_at: now - Duration::days(approved_days_ago),
        }
    }

    #[test]
    fn selects_oldest_claims_until_amount_is_covered() {
        // Sorted oldest-first, as the query returns them
        let claims = vec![claim(500, 30), claim(700, 20), claim(900, 10)];

        let selected = select_oldest_covering(&claims, Decimal::new(1000, 2)).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0], claims[0].id);
        assert_eq!(selected[1], claims[1].id);
    }

    #[test]
    fn exact_cover_stops_selection() {
        let claims = vec![claim(500, 3), claim(500, 2), claim(500, 1)];

        let selected = select_oldest_covering(&claims, Decimal::new(1000, 2)).unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn shortfall_returns_none() {
        let claims = vec![claim(500, 2), claim(400, 1)];

        assert!(select_oldest_covering(&claims, Decimal::new(1000, 2)).is_none());
        assert!(select_oldest_covering(&[], Decimal::new(1, 2)).is_none());
    }

    #[test]
    fn zero_amount_selects_nothing() {
        let claims = vec![claim(500, 1)];

        let selected = select_oldest_covering(&claims, Decimal::ZERO).unwrap();
        assert!(selected.is_empty());
    }

    mod integration {
        use super::*;
        use crate::config::Config;
        use crate::database::NewConversion;
        use crate::metrics::MetricsService;
        use crate::models::*;

        async fn setup() -> (Arc<Database>, PayoutService) {
            let config = Config::load().unwrap();
            let database = Arc::new(Database::new(&config.database_url, 2).await.unwrap());
            database.migrate().await.unwrap();
            let metrics = Arc::new(MetricsService::new());
            let service = PayoutService::new(database.clone(), metrics);
            (database, service)
        }

        /// Seeds an influencer with `amounts.len()` approved conversions
        async fn seed_influencer(db: &Database, amounts: &[i64]) -> Uuid {
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
                        default_commission_rate: Some(Decimal::new(10, 2)),
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
                .unwrap();

            for (i, amount) in amounts.iter().enumerate() {
                db.insert_conversion(NewConversion {
                    tracking_link_id: link.id,
                    influencer_id: influencer.id,
                    order_id: format!("ORD-{i}"),
                    order_value: Decimal::new(amount * 10, 2),
                    commission_rate: Decimal::new(10, 2),
                    commission_amount: Decimal::new(*amount, 2),
                    status: ConversionStatus::Approved,
                    occurred_at: Utc::now(),
                })
                .await
                .unwrap()
                .unwrap();
            }

            influencer.id
        }

        fn payout_request(amount: i64) -> PayoutRequest {
            PayoutRequest {
                amount: Decimal::new(amount, 2),
                method: PayoutMethod::Paypal,
                payment_details: serde_json::json!({ "email": "creator@example.com" }),
                notes: None,
            }
        }

        #[tokio::test]
        #[ignore] // Requires database connection
        async fn test_payout_decreases_balance_by_exact_amount() {
            let (db, service) = setup().await;
            // 30.00 of approved commission
            let influencer_id = seed_influencer(&db, &[1000, 1200, 800]).await;

            let before = service.get_balance(influencer_id).await.unwrap();
            assert_eq!(before.available_balance, Decimal::new(3000, 2));

            let payout = service
                .request_payout(influencer_id, payout_request(1500))
                .await
                .unwrap();
            assert_eq!(payout.status, PayoutStatus::Pending);

            let after = service.get_balance(influencer_id).await.unwrap();
            assert_eq!(after.available_balance, Decimal::new(1500, 2));

            // Attached oldest-first until 15.00 was covered: 10.00 + 12.00
            let claimed = db.payout_conversion_ids(payout.id).await.unwrap();
            assert_eq!(claimed.len(), 2);
        }

        #[tokio::test]
        #[ignore] // Requires database connection
        async fn test_conversions_are_never_claimed_twice() {
            let (db, service) = setup().await;
            let influencer_id = seed_influencer(&db, &[1000, 1000]).await;

            let first = service
                .request_payout(influencer_id, payout_request(1000))
                .await
                .unwrap();
            let second = service
                .request_payout(influencer_id, payout_request(1000))
                .await
                .unwrap();

            let first_ids = db.payout_conversion_ids(first.id).await.unwrap();
            let second_ids = db.payout_conversion_ids(second.id).await.unwrap();
            assert!(first_ids.iter().all(|id| !second_ids.contains(id)));

            // The pool is exhausted now
            let err = service
                .request_payout(influencer_id, payout_request(100))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::InsufficientBalance(_)));
        }

        #[tokio::test]
        #[ignore] // Requires database connection
        async fn test_cancelling_a_payout_releases_its_conversions() {
            let (db, service) = setup().await;
            let influencer_id = seed_influencer(&db, &[2000]).await;

            let payout = service
                .request_payout(influencer_id, payout_request(2000))
                .await
                .unwrap();
            assert_eq!(
                service.get_balance(influencer_id).await.unwrap().available_balance,
                Decimal::ZERO
            );

            let cancelled = service.cancel_payout(influencer_id, payout.id).await.unwrap();
            assert_eq!(cancelled.status, PayoutStatus::Cancelled);
            assert_eq!(
                service.get_balance(influencer_id).await.unwrap().available_balance,
                Decimal::new(2000, 2)
            );
            assert!(db.payout_conversion_ids(payout.id).await.unwrap().is_empty());

            // A cancelled payout cannot be cancelled again
            let err = service.cancel_payout(influencer_id, payout.id).await.unwrap_err();
            assert!(matches!(err, AppError::Conflict(_)));
        }
    }
}
