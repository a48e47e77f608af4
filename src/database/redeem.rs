use chrono::{Duration, NaiveDateTime};
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{info, instrument, warn};

use crate::database::balances::{
    add_daily_stats, lock_user_balance, lock_user_venue_balance, lock_venue_balance, save_user_balance,
    save_user_venue_balance, save_venue_balance, DailyDelta,
};
use crate::database::models::{NewLedgerEntry, NewPointLot, RedeemableUnit};
use crate::database::{entries, idgen};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::ledger::{EntryKind, LotStatus, LOT_LIFETIME_DAYS};
use crate::notify::{self, LoyaltyEvent, Notifier};
use crate::tier::Tier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionResult {
    pub identifier: String,
    pub venue_id: String,
    pub points_earned: i64,
    /// Global balance right after the credit.
    pub new_balance: i64,
    pub is_bonus: bool,
    pub venue_balance: i64,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    NotFound,
    AlreadyUsed,
    Expired,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::NotFound => "not_found",
            InvalidReason::AlreadyUsed => "already_used",
            InvalidReason::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitStatus {
    pub identifier: String,
    pub valid: bool,
    pub reason: Option<InvalidReason>,
    pub unit: Option<RedeemableUnit>,
}

/// Used takes precedence over expired: it means the value already went to someone.
fn invalid_reason(unit: &RedeemableUnit, now: NaiveDateTime) -> Option<InvalidReason> {
    if unit.used {
        Some(InvalidReason::AlreadyUsed)
    } else if unit.is_expired(now) {
        Some(InvalidReason::Expired)
    } else {
        None
    }
}

fn find_unit(conn: &mut PgConnection, req_identifier: &str) -> LedgerResult<Option<RedeemableUnit>> {
    use crate::schema::redeemable_unit::dsl::*;
    Ok(redeemable_unit
        .filter(identifier.eq(req_identifier))
        .first::<RedeemableUnit>(conn)
        .optional()?)
}

/// Read-only pre-check so a client can tell whether a code is still good.
pub fn check_status(conn: &mut PgConnection, req_identifier: &str, now: NaiveDateTime) -> LedgerResult<UnitStatus> {
    let normalized = crate::idgen::normalize(req_identifier);
    let unit = find_unit(conn, &normalized)?;
    let reason = match &unit {
        None => Some(InvalidReason::NotFound),
        Some(unit) => invalid_reason(unit, now),
    };
    Ok(UnitStatus {
        identifier: normalized,
        valid: reason.is_none(),
        reason,
        unit,
    })
}

// set used=true where used=false; exactly one concurrent caller gets the row back
fn claim_unit(
    conn: &mut PgConnection,
    req_identifier: &str,
    req_user_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<RedeemableUnit> {
    use crate::schema::redeemable_unit::dsl::*;
    diesel::update(
        redeemable_unit
            .filter(identifier.eq(req_identifier))
            .filter(used.eq(false))
            .filter(expires_at.ge(now)),
    )
    .set((used.eq(true), used_by.eq(Some(req_user_id)), used_at.eq(Some(now))))
    .get_result::<RedeemableUnit>(conn)
    .optional()?
    .ok_or_else(|| LedgerError::AlreadyUsed(req_identifier.to_string()))
}

fn redeem_in_transaction(
    conn: &mut PgConnection,
    req_identifier: &str,
    req_user_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<RedemptionResult> {
    let unit = find_unit(conn, req_identifier)?
        .ok_or_else(|| LedgerError::NotFound(Entity::Unit, req_identifier.to_string()))?;
    match invalid_reason(&unit, now) {
        Some(InvalidReason::AlreadyUsed) => return Err(LedgerError::AlreadyUsed(unit.identifier)),
        Some(InvalidReason::Expired) => return Err(LedgerError::Expired(unit.identifier)),
        _ => {}
    }

    let unit = claim_unit(conn, req_identifier, req_user_id, now)?;
    let points = unit.points;

    let (mut user, _) = lock_user_balance(conn, req_user_id, now)?;
    user.credit(points)?;

    let lot = NewPointLot {
        id: idgen::next(),
        user_id: req_user_id.to_string(),
        venue_id: unit.venue_id.clone(),
        points,
        status: LotStatus::Active.as_str().to_string(),
        earned_at: now,
        expires_at: now + Duration::days(LOT_LIFETIME_DAYS),
    };
    {
        use crate::schema::point_lot::dsl::*;
        diesel::insert_into(point_lot).values(&lot).execute(conn)?;
    }

    let (mut user_venue, first_visit) = lock_user_venue_balance(conn, req_user_id, &unit.venue_id, now)?;
    user_venue.credit(points)?;
    user_venue.record_visit(now);

    let (mut venue, _) = lock_venue_balance(conn, &unit.venue_id, now)?;
    venue.record_issued(points, &unit.purchase_amount)?;
    if first_visit {
        venue.user_count += 1;
    }
    add_daily_stats(
        conn,
        &unit.venue_id,
        now.date(),
        &DailyDelta {
            points_issued: points,
            revenue: unit.purchase_amount.clone(),
            order_count: 1,
            ..Default::default()
        },
    )?;

    let description = if unit.is_bonus {
        format!("Earned {points} points (x{} bonus)", unit.bonus_multiplier)
    } else {
        format!("Earned {points} points")
    };
    let mut entry = NewLedgerEntry::new(
        EntryKind::Earned,
        req_user_id,
        &unit.venue_id,
        points,
        user.balance,
        description,
        now,
    );
    entry.purchase_amount = Some(unit.purchase_amount.clone());
    entry.multiplier = Some(&unit.multiplier * &unit.bonus_multiplier);
    entry.unit_identifier = Some(unit.identifier.clone());
    entry.lot_id = Some(lot.id);
    entries::append(conn, &[entry])?;

    save_user_balance(conn, &user, now)?;
    save_user_venue_balance(conn, &user_venue)?;
    save_venue_balance(conn, &venue, now)?;

    Ok(RedemptionResult {
        identifier: unit.identifier,
        venue_id: unit.venue_id,
        points_earned: points,
        new_balance: user.balance,
        is_bonus: unit.is_bonus,
        venue_balance: user_venue.balance,
        tier: user_venue.tier(),
    })
}

/// Consumes a redeemable unit into the user's balances. All storage changes
/// commit together; the notification goes out only after the commit and its
/// failure never affects the result.
#[instrument(skip(conn, notifier))]
pub fn redeem(
    conn: &mut PgConnection,
    notifier: &dyn Notifier,
    req_identifier: &str,
    req_user_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<RedemptionResult> {
    let normalized = crate::idgen::normalize(req_identifier);
    let result = conn
        .transaction::<_, LedgerError, _>(|conn| redeem_in_transaction(conn, &normalized, req_user_id, now))
        .map_err(|e| {
            if e.is_retryable() {
                warn!(error = %e, "redemption aborted");
            }
            e
        })?;

    info!(
        identifier = %result.identifier,
        venue_id = %result.venue_id,
        points = result.points_earned,
        new_balance = result.new_balance,
        "redeemed unit"
    );
    notify::emit(
        notifier,
        LoyaltyEvent::PointsEarned {
            user_id: req_user_id.to_string(),
            venue_id: result.venue_id.clone(),
            points: result.points_earned,
            is_bonus: result.is_bonus,
        },
    );
    Ok(result)
}
