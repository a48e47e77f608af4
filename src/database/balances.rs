//! Balance aggregates: user global, (user, venue) and venue totals.
//!
//! Every `lock_*` accessor creates the row on first use and then takes a
//! `FOR UPDATE` lock on it, so it must run inside a transaction. Callers take
//! the locks in one fixed order: user balance, then (user, venue) balance,
//! then venue balance, then the daily rollup.

use bigdecimal::{BigDecimal, Zero};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::upsert::excluded;
use diesel::{ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};

use crate::database::models::{UserBalance, UserVenueBalance, VenueBalance};
use crate::error::{LedgerError, LedgerResult};
use crate::tier::{recompute_tier, Tier};

fn require_positive(amount: i64) -> LedgerResult<()> {
    if amount <= 0 {
        return Err(LedgerError::InvalidValue(format!("amount must be positive, got {amount}")));
    }
    Ok(())
}

fn checked_add(total: i64, amount: i64) -> LedgerResult<i64> {
    total
        .checked_add(amount)
        .ok_or_else(|| LedgerError::InvalidValue(format!("adding {amount} to {total} overflows")))
}

impl UserBalance {
    pub fn credit(&mut self, amount: i64) -> LedgerResult<()> {
        require_positive(amount)?;
        let balance = checked_add(self.balance, amount)?;
        let lifetime_earned = checked_add(self.lifetime_earned, amount)?;
        self.balance = balance;
        self.lifetime_earned = lifetime_earned;
        Ok(())
    }

    /// Fails closed when `amount` exceeds the spendable balance.
    pub fn debit(&mut self, amount: i64) -> LedgerResult<()> {
        require_positive(amount)?;
        if amount > self.balance {
            return Err(LedgerError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.lifetime_spent += amount;
        Ok(())
    }

    /// Removes up to `amount` for expired lots, flooring at zero. Returns what was removed.
    pub fn expire(&mut self, amount: i64) -> i64 {
        let removed = amount.clamp(0, self.balance);
        self.balance -= removed;
        self.lifetime_spent += removed;
        removed
    }
}

impl UserVenueBalance {
    pub fn credit(&mut self, amount: i64) -> LedgerResult<()> {
        require_positive(amount)?;
        let balance = checked_add(self.balance, amount)?;
        let lifetime_earned = checked_add(self.lifetime_earned, amount)?;
        let tier_points = checked_add(self.tier_points, amount)?;
        self.balance = balance;
        self.lifetime_earned = lifetime_earned;
        self.tier_points = tier_points;
        self.tier = recompute_tier(self.tier_points).tier.as_str().to_string();
        Ok(())
    }

    pub fn debit(&mut self, amount: i64) -> LedgerResult<()> {
        require_positive(amount)?;
        if amount > self.balance {
            return Err(LedgerError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        self.lifetime_spent += amount;
        Ok(())
    }

    pub fn expire(&mut self, amount: i64) -> i64 {
        let removed = amount.clamp(0, self.balance);
        self.balance -= removed;
        self.lifetime_expired += removed;
        removed
    }

    pub fn record_visit(&mut self, now: NaiveDateTime) {
        self.visit_count += 1;
        self.first_visit_at.get_or_insert(now);
        self.last_visit_at = Some(now);
    }

    pub fn tier(&self) -> Tier {
        self.tier.parse().unwrap_or_else(|_| recompute_tier(self.tier_points).tier)
    }
}

impl VenueBalance {
    pub fn record_issued(&mut self, points: i64, revenue: &BigDecimal) -> LedgerResult<()> {
        self.points_issued = checked_add(self.points_issued, points)?;
        self.revenue = &self.revenue + revenue;
        self.order_count += 1;
        Ok(())
    }

    pub fn record_redeemed(&mut self, points: i64) {
        self.points_redeemed += points;
    }
}

// creates user balance record, on conflict does nothing
fn init_user_balance(conn: &mut PgConnection, req_user_id: &str, now: NaiveDateTime) -> LedgerResult<bool> {
    use crate::schema::user_balance::dsl::*;
    let inserted = diesel::insert_into(user_balance)
        .values((
            user_id.eq(req_user_id),
            balance.eq(0_i64),
            lifetime_earned.eq(0_i64),
            lifetime_spent.eq(0_i64),
            updated_at.eq(now),
        ))
        .on_conflict(user_id)
        .do_nothing()
        .execute(conn)?;
    Ok(inserted > 0)
}

fn init_user_venue_balance(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_venue_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<bool> {
    use crate::schema::user_venue_balance::dsl::*;
    let inserted = diesel::insert_into(user_venue_balance)
        .values((
            user_id.eq(req_user_id),
            venue_id.eq(req_venue_id),
            balance.eq(0_i64),
            lifetime_earned.eq(0_i64),
            lifetime_spent.eq(0_i64),
            lifetime_expired.eq(0_i64),
            tier_points.eq(0_i64),
            tier.eq(Tier::Bronze.as_str()),
            visit_count.eq(0_i32),
            created_at.eq(now),
        ))
        .on_conflict((user_id, venue_id))
        .do_nothing()
        .execute(conn)?;
    Ok(inserted > 0)
}

fn init_venue_balance(conn: &mut PgConnection, req_venue_id: &str, now: NaiveDateTime) -> LedgerResult<bool> {
    use crate::schema::venue_balance::dsl::*;
    let inserted = diesel::insert_into(venue_balance)
        .values((
            venue_id.eq(req_venue_id),
            points_issued.eq(0_i64),
            points_redeemed.eq(0_i64),
            revenue.eq(BigDecimal::zero()),
            order_count.eq(0_i64),
            user_count.eq(0_i64),
            updated_at.eq(now),
        ))
        .on_conflict(venue_id)
        .do_nothing()
        .execute(conn)?;
    Ok(inserted > 0)
}

/// Loads the user's global balance under a row lock, creating it on first use.
/// The flag is true when the row was created by this call.
pub fn lock_user_balance(
    conn: &mut PgConnection,
    req_user_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<(UserBalance, bool)> {
    let created = init_user_balance(conn, req_user_id, now)?;
    let record = {
        use crate::schema::user_balance::dsl::*;
        user_balance
            .filter(user_id.eq(req_user_id))
            .for_update()
            .first::<UserBalance>(conn)?
    };
    Ok((record, created))
}

/// Locks an existing global balance without creating one.
pub fn lock_existing_user_balance(conn: &mut PgConnection, req_user_id: &str) -> LedgerResult<Option<UserBalance>> {
    use crate::schema::user_balance::dsl::*;
    Ok(user_balance
        .filter(user_id.eq(req_user_id))
        .for_update()
        .first::<UserBalance>(conn)
        .optional()?)
}

pub fn lock_user_venue_balance(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_venue_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<(UserVenueBalance, bool)> {
    let created = init_user_venue_balance(conn, req_user_id, req_venue_id, now)?;
    let record = {
        use crate::schema::user_venue_balance::dsl::*;
        user_venue_balance
            .filter(user_id.eq(req_user_id))
            .filter(venue_id.eq(req_venue_id))
            .for_update()
            .first::<UserVenueBalance>(conn)?
    };
    Ok((record, created))
}

pub fn lock_existing_user_venue_balance(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_venue_id: &str,
) -> LedgerResult<Option<UserVenueBalance>> {
    use crate::schema::user_venue_balance::dsl::*;
    Ok(user_venue_balance
        .filter(user_id.eq(req_user_id))
        .filter(venue_id.eq(req_venue_id))
        .for_update()
        .first::<UserVenueBalance>(conn)
        .optional()?)
}

pub fn lock_venue_balance(
    conn: &mut PgConnection,
    req_venue_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<(VenueBalance, bool)> {
    let created = init_venue_balance(conn, req_venue_id, now)?;
    let record = {
        use crate::schema::venue_balance::dsl::*;
        venue_balance
            .filter(venue_id.eq(req_venue_id))
            .for_update()
            .first::<VenueBalance>(conn)?
    };
    Ok((record, created))
}

pub fn save_user_balance(conn: &mut PgConnection, record: &UserBalance, now: NaiveDateTime) -> LedgerResult<()> {
    use crate::schema::user_balance::dsl::*;
    diesel::update(user_balance.filter(user_id.eq(&record.user_id)))
        .set((
            balance.eq(record.balance),
            lifetime_earned.eq(record.lifetime_earned),
            lifetime_spent.eq(record.lifetime_spent),
            updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn save_user_venue_balance(conn: &mut PgConnection, record: &UserVenueBalance) -> LedgerResult<()> {
    use crate::schema::user_venue_balance::dsl::*;
    diesel::update(
        user_venue_balance
            .filter(user_id.eq(&record.user_id))
            .filter(venue_id.eq(&record.venue_id)),
    )
    .set((
        balance.eq(record.balance),
        lifetime_earned.eq(record.lifetime_earned),
        lifetime_spent.eq(record.lifetime_spent),
        lifetime_expired.eq(record.lifetime_expired),
        tier_points.eq(record.tier_points),
        tier.eq(&record.tier),
        visit_count.eq(record.visit_count),
        first_visit_at.eq(record.first_visit_at),
        last_visit_at.eq(record.last_visit_at),
    ))
    .execute(conn)?;
    Ok(())
}

pub fn save_venue_balance(conn: &mut PgConnection, record: &VenueBalance, now: NaiveDateTime) -> LedgerResult<()> {
    use crate::schema::venue_balance::dsl::*;
    diesel::update(venue_balance.filter(venue_id.eq(&record.venue_id)))
        .set((
            points_issued.eq(record.points_issued),
            points_redeemed.eq(record.points_redeemed),
            revenue.eq(&record.revenue),
            order_count.eq(record.order_count),
            user_count.eq(record.user_count),
            updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Increments to apply to one venue's daily rollup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyDelta {
    pub points_issued: i64,
    pub points_redeemed: i64,
    pub revenue: BigDecimal,
    pub order_count: i64,
}

pub fn add_daily_stats(
    conn: &mut PgConnection,
    req_venue_id: &str,
    req_day: NaiveDate,
    delta: &DailyDelta,
) -> LedgerResult<()> {
    use crate::schema::venue_daily_stats::dsl::*;
    diesel::insert_into(venue_daily_stats)
        .values((
            venue_id.eq(req_venue_id),
            day.eq(req_day),
            points_issued.eq(delta.points_issued),
            points_redeemed.eq(delta.points_redeemed),
            revenue.eq(&delta.revenue),
            order_count.eq(delta.order_count),
        ))
        .on_conflict((venue_id, day))
        .do_update()
        .set((
            points_issued.eq(points_issued + excluded(points_issued)),
            points_redeemed.eq(points_redeemed + excluded(points_redeemed)),
            revenue.eq(revenue + excluded(revenue)),
            order_count.eq(order_count + excluded(order_count)),
        ))
        .execute(conn)?;
    Ok(())
}
