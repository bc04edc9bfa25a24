//! Commission rate resolution
//!
//! Pure, deterministic resolution of the effective commission rate for a
//! conversion context. No storage access happens here, so a recorded
//! conversion's rate can always be recomputed from the same inputs for
//! audit purposes.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{AppError, AppResult};
use crate::models::{Brand, Campaign, Product};

/// Resolves the effective commission rate for a conversion context.
///
/// Precedence: a live campaign's rate overrides the product's rate, which
/// overrides the brand's default, which falls back to the platform
/// default. A campaign that is disabled, outside its date window, or
/// without a rate of its own is skipped, not an error.
pub fn resolve_rate(
    campaign: Option<&Campaign>,
    product: &Product,
    brand: &Brand,
    platform_default: Decimal,
    now: DateTime<Utc>,
) -> AppResult<Decimal> {
    let rate = campaign
        .filter(|c| c.is_live(now))
        .and_then(|c| c.commission_rate)
        .or(product.commission_rate)
        .or(brand.default_commission_rate)
        .unwrap_or(platform_default);

    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(AppError::Config(format!(
            "Resolved commission rate {} is outside [0, 1]",
            rate
        )));
    }

    Ok(rate)
}

/// Commission owed on an order: order_value * rate, rounded to 2 decimal
/// places with half-up rounding.
pub fn commission_amount(order_value: Decimal, rate: Decimal) -> Decimal {
    (order_value * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn brand(default_rate: Option<Decimal>) -> Brand {
        let now = Utc::now();
        Brand {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            display_name: "Acme".to_string(),
            default_commission_rate: default_rate,
            integration_token: crate::secret::Secret::new("itk_test".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    fn product(brand_id: Uuid, rate: Option<Decimal>) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            brand_id,
            name: "Walnut desk".to_string(),
            product_url: "https://shop.acme.test/desk".to_string(),
            commission_rate: rate,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn campaign(brand_id: Uuid, rate: Option<Decimal>, is_active: bool) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            brand_id,
            name: "spring-sale".to_string(),
            commission_rate: rate,
            is_active,
            starts_at: None,
            ends_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn pct(n: i64) -> Decimal {
        Decimal::new(n, 2)
    }

    #[test]
    fn campaign_rate_wins_over_product_and_brand() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, Some(pct(10)));
        let c = campaign(b.id, Some(pct(20)), true);

        let rate = resolve_rate(Some(&c), &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(20));
        assert_eq!(commission_amount(Decimal::new(10000, 2), rate), pct(2000));
    }

    #[test]
    fn product_rate_wins_when_no_campaign() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, Some(pct(10)));

        let rate = resolve_rate(None, &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(10));
        assert_eq!(commission_amount(Decimal::new(10000, 2), rate), pct(1000));
    }

    #[test]
    fn brand_default_wins_when_product_has_no_rate() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, None);

        let rate = resolve_rate(None, &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(8));
        assert_eq!(commission_amount(Decimal::new(10000, 2), rate), pct(800));
    }

    #[test]
    fn platform_default_applies_when_nothing_is_set() {
        let now = Utc::now();
        let b = brand(None);
        let p = product(b.id, None);

        let rate = resolve_rate(None, &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(10));
    }

    #[test]
    fn inactive_campaign_is_skipped() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, Some(pct(10)));
        let c = campaign(b.id, Some(pct(20)), false);

        let rate = resolve_rate(Some(&c), &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(10));
    }

    #[test]
    fn expired_campaign_is_skipped() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, Some(pct(10)));
        let mut c = campaign(b.id, Some(pct(20)), true);
        c.ends_at = Some(now - chrono::Duration::days(1));

        let rate = resolve_rate(Some(&c), &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(10));
    }

    #[test]
    fn campaign_without_own_rate_falls_through() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, Some(pct(10)));
        let c = campaign(b.id, None, true);

        let rate = resolve_rate(Some(&c), &p, &b, pct(10), now).unwrap();
        assert_eq!(rate, pct(10));
    }

    #[test]
    fn out_of_range_rate_is_a_configuration_error() {
        let now = Utc::now();
        let b = brand(Some(Decimal::new(15, 1))); // 1.5
        let p = product(b.id, None);

        let err = resolve_rate(None, &p, &b, pct(10), now).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn commission_rounds_half_up_to_two_places() {
        // 10.05 * 0.10 = 1.005 -> 1.01
        assert_eq!(
            commission_amount(Decimal::new(1005, 2), pct(10)),
            Decimal::new(101, 2)
        );
        // 10.04 * 0.10 = 1.004 -> 1.00
        assert_eq!(
            commission_amount(Decimal::new(1004, 2), pct(10)),
            Decimal::new(100, 2)
        );
    }

    #[test]
    fn resolution_is_deterministic_for_identical_inputs() {
        let now = Utc::now();
        let b = brand(Some(pct(8)));
        let p = product(b.id, Some(pct(12)));
        let c = campaign(b.id, Some(pct(25)), true);

        let first = resolve_rate(Some(&c), &p, &b, pct(10), now).unwrap();
        let second = resolve_rate(Some(&c), &p, &b, pct(10), now).unwrap();
        assert_eq!(first, second);
    }
}
