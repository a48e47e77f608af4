use bigdecimal::{BigDecimal, Signed, ToPrimitive};
use chrono::NaiveDateTime;
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{debug, info, instrument, warn};

use crate::database::models::{NewRedeemableUnit, RedeemableUnit, Venue};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::idgen;
use crate::ledger::{UnitKind, DEFAULT_POINTS_PER_PURCHASE, MAX_GENERATION_ATTEMPTS};
use crate::schedule::{venue_local_time, ActiveMultiplier, BonusSchedule};

/// Who and where a unit was minted from, kept for audit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MintMetadata {
    pub issued_by: Option<String>,
    pub client_ip: Option<String>,
    pub extra: Option<serde_json::Value>,
}

fn floor_to_points(value: &BigDecimal) -> LedgerResult<i64> {
    // with_scale(0) truncates, which is floor for the non-negative values seen here
    value
        .with_scale(0)
        .to_i64()
        .ok_or_else(|| LedgerError::InvalidValue(format!("point value {value} is out of range")))
}

/// Points a purchase is worth at this venue under the given bonus multiplier.
///
/// A positive purchase earns `floor(amount * venue multiplier)`; a zero purchase
/// earns the venue's flat per-visit award. The result is then scaled by the
/// bonus multiplier and floored again.
pub fn compute_points(purchase_amount: &BigDecimal, venue: &Venue, bonus: &ActiveMultiplier) -> LedgerResult<i64> {
    let base = if purchase_amount.is_positive() {
        floor_to_points(&(purchase_amount * &venue.points_multiplier))?
    } else {
        venue
            .points_per_purchase
            .map(i64::from)
            .unwrap_or(DEFAULT_POINTS_PER_PURCHASE)
    };
    let value = floor_to_points(&(BigDecimal::from(base) * &bonus.multiplier))?;
    if value <= 0 {
        return Err(LedgerError::InvalidValue(format!(
            "purchase of {purchase_amount} at venue {} is worth {value} points",
            venue.id
        )));
    }
    Ok(value)
}

/// Multiplier in force at the venue right now. A schedule that fails to parse
/// is logged and ignored rather than blocking the till.
pub fn active_multiplier(venue: &Venue, now: NaiveDateTime) -> ActiveMultiplier {
    let Some(raw) = venue.bonus_hours.as_ref() else {
        return ActiveMultiplier::none();
    };
    match BonusSchedule::from_json(raw) {
        Ok(schedule) => schedule.active_multiplier(venue_local_time(now, venue.utc_offset_minutes)),
        Err(e) => {
            warn!(venue_id = %venue.id, error = %e, "ignoring malformed bonus hours schedule");
            ActiveMultiplier::none()
        }
    }
}

pub fn load_venue(conn: &mut PgConnection, req_venue_id: &str) -> LedgerResult<Venue> {
    use crate::schema::venue::dsl::*;
    venue
        .filter(id.eq(req_venue_id))
        .first::<Venue>(conn)
        .optional()?
        .ok_or_else(|| LedgerError::NotFound(Entity::Venue, req_venue_id.to_string()))
}

fn insert_unit(conn: &mut PgConnection, unit: &NewRedeemableUnit) -> LedgerResult<Option<RedeemableUnit>> {
    use crate::schema::redeemable_unit::dsl::*;
    Ok(diesel::insert_into(redeemable_unit)
        .values(unit)
        .on_conflict(identifier)
        .do_nothing()
        .get_result::<RedeemableUnit>(conn)
        .optional()?)
}

/// Creates an unused redeemable unit worth the purchase. No points move until
/// the unit is redeemed, so nothing is written to the ledger here.
#[instrument(skip(conn, metadata))]
pub fn mint(
    conn: &mut PgConnection,
    req_venue_id: &str,
    purchase_amount: &BigDecimal,
    kind: UnitKind,
    metadata: MintMetadata,
    now: NaiveDateTime,
) -> LedgerResult<RedeemableUnit> {
    if purchase_amount.is_negative() {
        return Err(LedgerError::InvalidValue(format!(
            "purchase amount must not be negative, got {purchase_amount}"
        )));
    }

    // schedule is read fresh from the venue row on every mint
    let venue = load_venue(conn, req_venue_id)?;
    if !venue.is_active {
        return Err(LedgerError::InactiveVenue(venue.id));
    }
    let bonus = active_multiplier(&venue, now);
    let points = compute_points(purchase_amount, &venue, &bonus)?;

    let mut candidate = NewRedeemableUnit {
        identifier: String::new(),
        kind: kind.as_str().to_string(),
        venue_id: venue.id.clone(),
        points,
        purchase_amount: purchase_amount.clone(),
        multiplier: venue.points_multiplier.clone(),
        bonus_multiplier: bonus.multiplier.clone(),
        is_bonus: bonus.is_bonus,
        used: false,
        expires_at: now + kind.ttl(),
        issued_by: metadata.issued_by,
        client_ip: metadata.client_ip,
        metadata: metadata.extra,
        created_at: now,
    };

    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        candidate.identifier = idgen::generate(kind, now);
        if let Some(unit) = insert_unit(conn, &candidate)? {
            info!(
                identifier = %unit.identifier,
                venue_id = %unit.venue_id,
                points = unit.points,
                is_bonus = unit.is_bonus,
                "minted redeemable unit"
            );
            return Ok(unit);
        }
        debug!(attempt, kind = %kind, "identifier collision, regenerating");
    }
    Err(LedgerError::GenerationExhausted(MAX_GENERATION_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{decimal, insert_venue, now, test_pool, unique, VenueFixture};
    use diesel::result::Error;
    use diesel::Connection;

    fn venue(multiplier: &str, per_purchase: Option<i32>) -> Venue {
        Venue {
            id: "v1".into(),
            name: "Cafe".into(),
            is_active: true,
            points_multiplier: decimal(multiplier),
            points_per_purchase: per_purchase,
            bonus_hours: None,
            utc_offset_minutes: 0,
            created_at: now(),
        }
    }

    fn bonus(multiplier: &str) -> ActiveMultiplier {
        ActiveMultiplier {
            multiplier: decimal(multiplier),
            is_bonus: true,
        }
    }

    #[test]
    fn test_compute_points_plain() {
        let points = compute_points(&decimal("200"), &venue("1.0", None), &ActiveMultiplier::none()).unwrap();
        assert_eq!(points, 200);
    }

    #[test]
    fn test_compute_points_bonus_doubles() {
        let points = compute_points(&decimal("100"), &venue("1.0", None), &bonus("2.0")).unwrap();
        assert_eq!(points, 200);
    }

    #[test]
    fn test_compute_points_floors_each_step() {
        // floor(99.99 * 1.5) = 149, floor(149 * 1.5) = 223
        let points = compute_points(&decimal("99.99"), &venue("1.5", None), &bonus("1.5")).unwrap();
        assert_eq!(points, 223);
    }

    #[test]
    fn test_compute_points_zero_purchase_uses_flat_award() {
        let plain = ActiveMultiplier::none();
        assert_eq!(compute_points(&decimal("0"), &venue("1.0", Some(12)), &plain).unwrap(), 12);
        assert_eq!(
            compute_points(&decimal("0"), &venue("1.0", None), &plain).unwrap(),
            DEFAULT_POINTS_PER_PURCHASE
        );
        assert_eq!(compute_points(&decimal("0"), &venue("1.0", None), &bonus("2")).unwrap(), 10);
    }

    #[test]
    fn test_compute_points_rejects_worthless_purchase() {
        let err = compute_points(&decimal("0.5"), &venue("1.0", None), &ActiveMultiplier::none()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidValue(_)));
        let err = compute_points(&decimal("0"), &venue("1.0", Some(0)), &ActiveMultiplier::none()).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidValue(_)));
    }

    #[test]
    fn test_active_multiplier_ignores_malformed_schedule() {
        let mut v = venue("1.0", None);
        v.bonus_hours = Some(serde_json::json!({ "windows": "always" }));
        assert_eq!(active_multiplier(&v, now()), ActiveMultiplier::none());
    }

    #[actix_web::test]
    async fn test_mint_code() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let metadata = MintMetadata {
                issued_by: Some("cashier-7".into()),
                client_ip: Some("10.0.0.7".into()),
                extra: None,
            };
            let unit = mint(conn, &venue.id, &decimal("200"), UnitKind::Code, metadata, now()).unwrap();

            assert_eq!(unit.points, 200);
            assert_eq!(unit.identifier.len(), 6);
            assert_eq!(unit.identifier, unit.identifier.to_ascii_uppercase());
            assert_eq!(unit.kind, "code");
            assert!(!unit.used);
            assert!(!unit.is_bonus);
            assert_eq!(unit.used_by, None);
            assert_eq!(unit.expires_at, now() + chrono::Duration::hours(24));
            assert_eq!(unit.issued_by.as_deref(), Some("cashier-7"));

            // minting moves no points
            let entries: i64 = {
                use crate::schema::ledger_entry::dsl::*;
                ledger_entry.filter(venue_id.eq(&venue.id)).count().get_result(conn)?
            };
            assert_eq!(entries, 0);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_mint_qr_during_bonus_hours() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            // now() is a Wednesday (3) at noon
            let venue = VenueFixture {
                bonus_hours: Some(serde_json::json!({
                    "windows": [{ "days": [3], "start": "11:00", "end": "14:00", "multiplier": 2.0 }]
                })),
                ..Default::default()
            }
            .insert(conn);
            let unit = mint(
                conn,
                &venue.id,
                &decimal("100"),
                UnitKind::QrTransaction,
                MintMetadata::default(),
                now(),
            )
            .unwrap();

            assert_eq!(unit.points, 200);
            assert!(unit.is_bonus);
            assert_eq!(unit.bonus_multiplier, decimal("2"));
            assert!(unit.identifier.starts_with("QR-"));
            assert_eq!(unit.expires_at, now() + chrono::Duration::minutes(30));
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_mint_rejects_unknown_and_inactive_venues() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let missing = unique("venue");
            let err = mint(conn, &missing, &decimal("10"), UnitKind::Code, MintMetadata::default(), now()).unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(Entity::Venue, _)));

            let closed = VenueFixture {
                is_active: false,
                ..Default::default()
            }
            .insert(conn);
            let err = mint(conn, &closed.id, &decimal("10"), UnitKind::Code, MintMetadata::default(), now()).unwrap_err();
            assert!(matches!(err, LedgerError::InactiveVenue(_)));
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_mint_negative_and_zero_purchases() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let err = mint(conn, &venue.id, &decimal("-1"), UnitKind::Code, MintMetadata::default(), now()).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidValue(_)));

            let flat = mint(
                conn,
                &venue.id,
                &BigDecimal::from(0),
                UnitKind::QrTransaction,
                MintMetadata::default(),
                now(),
            )
            .unwrap();
            assert_eq!(flat.points, DEFAULT_POINTS_PER_PURCHASE);
            Ok(())
        });
    }
}
