use chrono::NaiveDate;
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::{LedgerEntry, PointLot, UserBalance, UserVenueBalance, VenueBalance, VenueDailyStats};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::ledger::LotStatus;
use crate::tier::{recompute_tier, TierProgress};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct UserBalanceView {
    pub balance: UserBalance,
    /// Active lots, soonest expiry first.
    pub lots: Vec<PointLot>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserVenueBalanceView {
    pub balance: UserVenueBalance,
    pub progress: TierProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VenueBalanceView {
    pub balance: VenueBalance,
    /// Most recent days first.
    pub daily: Vec<VenueDailyStats>,
}

pub fn load_user_balance(conn: &mut PgConnection, req_user_id: &str) -> LedgerResult<UserBalanceView> {
    let balance = {
        use crate::schema::user_balance::dsl::*;
        user_balance
            .filter(user_id.eq(req_user_id))
            .first::<UserBalance>(conn)
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(Entity::User, req_user_id.to_string()))?
    };
    let lots = {
        use crate::schema::point_lot::dsl::*;
        point_lot
            .filter(user_id.eq(req_user_id))
            .filter(status.eq(LotStatus::Active.as_str()))
            .order((expires_at.asc(), id.asc()))
            .load::<PointLot>(conn)?
    };
    Ok(UserBalanceView { balance, lots })
}

pub fn load_user_venue_balance(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_venue_id: &str,
) -> LedgerResult<UserVenueBalanceView> {
    let balance = {
        use crate::schema::user_venue_balance::dsl::*;
        user_venue_balance
            .filter(user_id.eq(req_user_id))
            .filter(venue_id.eq(req_venue_id))
            .first::<UserVenueBalance>(conn)
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(Entity::User, format!("{req_user_id} at venue {req_venue_id}")))?
    };
    let progress = recompute_tier(balance.tier_points);
    Ok(UserVenueBalanceView { balance, progress })
}

pub fn load_venue_balance(
    conn: &mut PgConnection,
    req_venue_id: &str,
    since: Option<NaiveDate>,
) -> LedgerResult<VenueBalanceView> {
    let balance = {
        use crate::schema::venue_balance::dsl::*;
        venue_balance
            .filter(venue_id.eq(req_venue_id))
            .first::<VenueBalance>(conn)
            .optional()?
            .ok_or_else(|| LedgerError::NotFound(Entity::Venue, req_venue_id.to_string()))?
    };
    let daily = {
        use crate::schema::venue_daily_stats::dsl::*;
        let mut query = venue_daily_stats
            .filter(venue_id.eq(req_venue_id))
            .order(day.desc())
            .into_boxed();
        if let Some(since) = since {
            query = query.filter(day.ge(since));
        }
        query.load::<VenueDailyStats>(conn)?
    };
    Ok(VenueBalanceView { balance, daily })
}

pub fn clamp_history_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT)
}

/// Ledger entries for a user, newest first.
pub fn ledger_history(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_venue_id: Option<&str>,
    limit: Option<i64>,
) -> LedgerResult<Vec<LedgerEntry>> {
    use crate::schema::ledger_entry::dsl::*;
    let mut query = ledger_entry
        .filter(user_id.eq(req_user_id))
        .order((created_at.desc(), id.desc()))
        .limit(clamp_history_limit(limit))
        .into_boxed();
    if let Some(req_venue_id) = req_venue_id {
        query = query.filter(venue_id.eq(req_venue_id));
    }
    Ok(query.load::<LedgerEntry>(conn)?)
}
