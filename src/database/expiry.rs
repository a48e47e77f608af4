//! Expiry sweeper: ages out point lots past their retention window and warns
//! users about lots that are about to go.
//!
//! Each user is expired in its own transaction. Lots are re-selected as
//! `active` under a row lock, so an interrupted or overlapping sweep never
//! expires the same lot twice.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use diesel::{Connection, ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{error, info, instrument};

use crate::database::balances::{
    add_daily_stats, lock_existing_user_balance, lock_user_venue_balance, lock_venue_balance, save_user_balance,
    save_user_venue_balance, save_venue_balance, DailyDelta,
};
use crate::database::entries;
use crate::database::models::{NewLedgerEntry, PointLot};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::ledger::{EntryKind, LotStatus, EXPIRY_WARNING_DAYS};
use crate::notify::{self, LoyaltyEvent, Notifier};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub users_processed: usize,
    pub users_failed: usize,
    /// Points actually removed from global balances.
    pub points_expired: i64,
    pub transactions_created: usize,
    pub warnings_sent: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserExpiry {
    pub user_id: String,
    pub lots_expired: usize,
    pub points_expired: i64,
    pub new_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryWarning {
    pub user_id: String,
    pub venue_id: String,
    pub points: i64,
    pub nearest_expiry: NaiveDateTime,
}

fn users_with_due_lots(conn: &mut PgConnection, now: NaiveDateTime) -> LedgerResult<Vec<String>> {
    use crate::schema::point_lot::dsl::*;
    Ok(point_lot
        .filter(status.eq(LotStatus::Active.as_str()))
        .filter(expires_at.le(now))
        .select(user_id)
        .distinct()
        .order(user_id)
        .load::<String>(conn)?)
}

// must run inside a transaction
fn expire_lots_for_user(
    conn: &mut PgConnection,
    req_user_id: &str,
    venue_filter: Option<&str>,
    cutoff: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> LedgerResult<UserExpiry> {
    let mut user = lock_existing_user_balance(conn, req_user_id)?
        .ok_or_else(|| LedgerError::NotFound(Entity::User, req_user_id.to_string()))?;

    let lots: Vec<PointLot> = {
        use crate::schema::point_lot::dsl::*;
        point_lot
            .filter(user_id.eq(req_user_id))
            .filter(status.eq(LotStatus::Active.as_str()))
            .order((venue_id.asc(), earned_at.asc(), id.asc()))
            .for_update()
            .load(conn)?
    };

    // venues in a fixed order so concurrent sweeps lock aggregates alike
    let mut by_venue: BTreeMap<String, Vec<PointLot>> = BTreeMap::new();
    for lot in lots.into_iter().filter(|lot| {
        venue_filter.map_or(true, |v| lot.venue_id == v) && cutoff.map_or(true, |c| lot.expires_at <= c)
    }) {
        by_venue.entry(lot.venue_id.clone()).or_default().push(lot);
    }

    let mut expired_ids = Vec::new();
    let mut expired_entries = Vec::new();
    let mut points_expired = 0;
    for (venue, group) in &by_venue {
        let (mut user_venue, _) = lock_user_venue_balance(conn, req_user_id, venue, now)?;
        let mut debited = 0;
        for lot in group {
            // the global balance loses what the venue balance actually gave up
            let removed = user_venue.expire(lot.points);
            debited += removed;
            points_expired += user.expire(removed);

            expired_ids.push(lot.id);
            let mut entry = NewLedgerEntry::new(
                EntryKind::Expired,
                req_user_id,
                venue,
                -lot.points,
                user.balance,
                format!("{} points expired (earned {})", lot.points, lot.earned_at.date()),
                now,
            );
            entry.lot_id = Some(lot.id);
            expired_entries.push(entry);
        }
        save_user_venue_balance(conn, &user_venue)?;

        let (mut aggregate, _) = lock_venue_balance(conn, venue, now)?;
        aggregate.record_redeemed(debited);
        save_venue_balance(conn, &aggregate, now)?;
        if debited > 0 {
            add_daily_stats(
                conn,
                venue,
                now.date(),
                &DailyDelta {
                    points_redeemed: debited,
                    ..Default::default()
                },
            )?;
        }
    }

    let lots_expired = expired_ids.len();
    if lots_expired > 0 {
        {
            use crate::schema::point_lot::dsl::*;
            diesel::update(point_lot.filter(id.eq_any(expired_ids)))
                .set((status.eq(LotStatus::Expired.as_str()), expired_at.eq(Some(now))))
                .execute(conn)?;
        }
        entries::append(conn, &expired_entries)?;
        save_user_balance(conn, &user, now)?;
    }

    Ok(UserExpiry {
        user_id: req_user_id.to_string(),
        lots_expired,
        points_expired,
        new_balance: user.balance,
    })
}

// locked lots belong to a user being expired right now; they get their warning next run
fn claim_expiry_warnings(conn: &mut PgConnection, now: NaiveDateTime) -> LedgerResult<Vec<PointLot>> {
    use crate::schema::point_lot::dsl::*;
    let horizon = now + Duration::days(EXPIRY_WARNING_DAYS);
    let lots = point_lot
        .filter(status.eq(LotStatus::Active.as_str()))
        .filter(expires_at.gt(now))
        .filter(expires_at.le(horizon))
        .filter(warning_sent_at.is_null())
        .for_update()
        .skip_locked()
        .load::<PointLot>(conn)?;
    if !lots.is_empty() {
        let ids: Vec<i64> = lots.iter().map(|lot| lot.id).collect();
        diesel::update(point_lot.filter(id.eq_any(ids)))
            .set(warning_sent_at.eq(Some(now)))
            .execute(conn)?;
    }
    Ok(lots)
}

/// One warning per (user, venue): total points at risk and the earliest expiry.
pub fn group_warnings(lots: &[PointLot]) -> Vec<ExpiryWarning> {
    let mut grouped: BTreeMap<(&str, &str), (i64, NaiveDateTime)> = BTreeMap::new();
    for lot in lots {
        grouped
            .entry((lot.user_id.as_str(), lot.venue_id.as_str()))
            .and_modify(|(points, nearest)| {
                *points += lot.points;
                *nearest = (*nearest).min(lot.expires_at);
            })
            .or_insert((lot.points, lot.expires_at));
    }
    grouped
        .into_iter()
        .map(|((user_id, venue_id), (points, nearest_expiry))| ExpiryWarning {
            user_id: user_id.to_string(),
            venue_id: venue_id.to_string(),
            points,
            nearest_expiry,
        })
        .collect()
}

/// Expires every active lot past its expiry date, then sends pre-expiry
/// warnings. A failure for one user is logged and does not stop the sweep.
#[instrument(skip(conn, notifier))]
pub fn sweep(conn: &mut PgConnection, notifier: &dyn Notifier, now: NaiveDateTime) -> LedgerResult<SweepSummary> {
    let mut summary = SweepSummary::default();

    for req_user_id in users_with_due_lots(conn, now)? {
        let result = conn.transaction::<_, LedgerError, _>(|conn| {
            expire_lots_for_user(conn, &req_user_id, None, Some(now), now)
        });
        match result {
            Ok(expiry) => {
                summary.users_processed += 1;
                summary.points_expired += expiry.points_expired;
                summary.transactions_created += expiry.lots_expired;
            }
            Err(e) => {
                error!(user_id = %req_user_id, error = %e, "failed to expire lots");
                summary.users_failed += 1;
            }
        }
    }

    match conn.transaction::<_, LedgerError, _>(|conn| claim_expiry_warnings(conn, now)) {
        Ok(lots) => {
            for warning in group_warnings(&lots) {
                notify::emit(
                    notifier,
                    LoyaltyEvent::PointsExpiringSoon {
                        user_id: warning.user_id,
                        venue_id: warning.venue_id,
                        points: warning.points,
                        nearest_expiry: warning.nearest_expiry,
                    },
                );
                summary.warnings_sent += 1;
            }
        }
        Err(e) => error!(error = %e, "failed to send expiry warnings"),
    }

    info!(
        users_processed = summary.users_processed,
        users_failed = summary.users_failed,
        points_expired = summary.points_expired,
        transactions_created = summary.transactions_created,
        warnings_sent = summary.warnings_sent,
        "expiry sweep finished"
    );
    Ok(summary)
}

/// Manual expiry: expires all of the user's active lots, optionally only those
/// earned at one venue, regardless of their expiry date.
#[instrument(skip(conn))]
pub fn sweep_user(
    conn: &mut PgConnection,
    req_user_id: &str,
    venue_filter: Option<&str>,
    now: NaiveDateTime,
) -> LedgerResult<UserExpiry> {
    let expiry = conn.transaction::<_, LedgerError, _>(|conn| {
        expire_lots_for_user(conn, req_user_id, venue_filter, None, now)
    })?;
    info!(
        lots_expired = expiry.lots_expired,
        points_expired = expiry.points_expired,
        "expired lots manually"
    );
    Ok(expiry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{LedgerEntry, UserBalance, UserVenueBalance, VenueBalance, VenueDailyStats};
    use crate::database::mutations::spend;
    use crate::database::test_support::{earn, insert_venue, now, test_pool, unique};
    use crate::notify::testing::RecordingNotifier;
    use diesel::result::Error;

    fn global(conn: &mut PgConnection, req_user_id: &str) -> UserBalance {
        use crate::schema::user_balance::dsl::*;
        user_balance.filter(user_id.eq(req_user_id)).first(conn).unwrap()
    }

    fn per_venue(conn: &mut PgConnection, req_user_id: &str, req_venue_id: &str) -> UserVenueBalance {
        use crate::schema::user_venue_balance::dsl::*;
        user_venue_balance
            .filter(user_id.eq(req_user_id))
            .filter(venue_id.eq(req_venue_id))
            .first(conn)
            .unwrap()
    }

    fn expired_entries(conn: &mut PgConnection, req_user_id: &str) -> Vec<LedgerEntry> {
        use crate::schema::ledger_entry::dsl::*;
        ledger_entry
            .filter(user_id.eq(req_user_id))
            .filter(kind.eq("expired"))
            .order(id.asc())
            .load(conn)
            .unwrap()
    }

    fn lot(user_id: &str, venue_id: &str, points: i64, expires_in_days: i64) -> PointLot {
        PointLot {
            id: 0,
            user_id: user_id.into(),
            venue_id: venue_id.into(),
            points,
            status: "active".into(),
            earned_at: now(),
            expires_at: now() + Duration::days(expires_in_days),
            expired_at: None,
            warning_sent_at: None,
        }
    }

    #[test]
    fn test_group_warnings_sums_per_user_and_venue() {
        let lots = vec![
            lot("u1", "v1", 10, 5),
            lot("u1", "v1", 15, 2),
            lot("u1", "v2", 7, 6),
            lot("u2", "v1", 3, 1),
        ];
        let warnings = group_warnings(&lots);
        assert_eq!(warnings.len(), 3);
        assert_eq!(
            warnings[0],
            ExpiryWarning {
                user_id: "u1".into(),
                venue_id: "v1".into(),
                points: 25,
                nearest_expiry: now() + Duration::days(2),
            }
        );
        assert_eq!(warnings[1].points, 7);
        assert_eq!(warnings[2].user_id, "u2");
    }

    #[test]
    fn test_group_warnings_empty() {
        assert!(group_warnings(&[]).is_empty());
    }

    #[actix_web::test]
    async fn test_sweep_conserves_balances() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let first = insert_venue(conn);
            let second = insert_venue(conn);
            let user = unique("user");
            let long_ago = now() - Duration::days(400);
            earn(conn, &first.id, &user, "100", long_ago);
            earn(conn, &second.id, &user, "50", long_ago);
            earn(conn, &first.id, &user, "30", now() - Duration::days(10));
            assert_eq!(global(conn, &user).balance, 180);

            let notifier = RecordingNotifier::default();
            let summary = sweep(conn, &notifier, now()).unwrap();
            assert!(summary.users_processed >= 1);
            assert_eq!(summary.users_failed, 0);
            assert_eq!(summary.points_expired, 150);
            assert_eq!(summary.transactions_created, 2);

            let after = global(conn, &user);
            assert_eq!(after.balance, 30);
            assert_eq!(after.lifetime_earned, 180);
            assert_eq!(after.lifetime_spent, 150);

            let at_first = per_venue(conn, &user, &first.id);
            assert_eq!(at_first.balance, 30);
            assert_eq!(at_first.lifetime_expired, 100);
            // tier points survive expiry
            assert_eq!(at_first.tier_points, 130);
            assert_eq!(per_venue(conn, &user, &second.id).balance, 0);

            let aggregate: VenueBalance = {
                use crate::schema::venue_balance::dsl::*;
                venue_balance.filter(venue_id.eq(&first.id)).first(conn)?
            };
            assert_eq!(aggregate.points_issued, 130);
            assert_eq!(aggregate.points_redeemed, 100);

            let today: VenueDailyStats = {
                use crate::schema::venue_daily_stats::dsl::*;
                venue_daily_stats
                    .filter(venue_id.eq(&first.id))
                    .filter(day.eq(now().date()))
                    .first(conn)?
            };
            assert_eq!(today.points_redeemed, 100);

            let history = expired_entries(conn, &user);
            assert_eq!(history.len(), 2);
            assert!(history.iter().all(|e| e.lot_id.is_some()));
            let mut amounts: Vec<i64> = history.iter().map(|e| e.points).collect();
            amounts.sort();
            assert_eq!(amounts, vec![-100, -50]);

            let lots: Vec<PointLot> = {
                use crate::schema::point_lot::dsl::*;
                point_lot.filter(user_id.eq(&user)).order(earned_at.asc()).load(conn)?
            };
            assert_eq!(lots.iter().filter(|l| l.status == "expired").count(), 2);
            assert!(lots.iter().filter(|l| l.status == "expired").all(|l| l.expired_at == Some(now())));
            assert_eq!(lots.iter().filter(|l| l.status == "active").count(), 1);

            // second run finds nothing left to do
            let again = sweep(conn, &notifier, now()).unwrap();
            assert_eq!(again.points_expired, 0);
            assert_eq!(again.transactions_created, 0);
            assert_eq!(global(conn, &user).balance, 30);
            assert_eq!(expired_entries(conn, &user).len(), 2);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_sweep_clamps_spent_balance_at_zero() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let user = unique("user");
            let long_ago = now() - Duration::days(400);
            earn(conn, &venue.id, &user, "100", long_ago);
            spend(conn, &user, &venue.id, 80, None, None, long_ago + Duration::days(1)).unwrap();

            let summary = sweep(conn, &RecordingNotifier::default(), now()).unwrap();
            assert_eq!(summary.points_expired, 20);

            let after = global(conn, &user);
            assert_eq!(after.balance, 0);
            assert_eq!(after.lifetime_spent, 100);
            let at_venue = per_venue(conn, &user, &venue.id);
            assert_eq!(at_venue.balance, 0);
            assert_eq!(at_venue.lifetime_expired, 20);

            // the entry records the whole lot even though only 20 were left
            let history = expired_entries(conn, &user);
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].points, -100);
            assert_eq!(history[0].balance_after, 0);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_expired_entries_snapshot_balance_per_lot() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let user = unique("user");
            let long_ago = now() - Duration::days(400);
            earn(conn, &venue.id, &user, "100", long_ago);
            earn(conn, &venue.id, &user, "50", long_ago + Duration::days(1));
            earn(conn, &venue.id, &user, "30", now() - Duration::days(10));

            sweep(conn, &RecordingNotifier::default(), now()).unwrap();

            let history = expired_entries(conn, &user);
            let trail: Vec<(i64, i64)> = history.iter().map(|e| (e.points, e.balance_after)).collect();
            assert_eq!(trail, vec![(-100, 80), (-50, 30)]);
            assert_eq!(global(conn, &user).balance, 30);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_clamp_keeps_points_from_other_venues() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let spent_down = insert_venue(conn);
            let untouched = insert_venue(conn);
            let user = unique("user");
            let long_ago = now() - Duration::days(400);
            earn(conn, &spent_down.id, &user, "100", long_ago);
            earn(conn, &untouched.id, &user, "100", now() - Duration::days(1));
            spend(conn, &user, &spent_down.id, 80, None, None, long_ago + Duration::days(1)).unwrap();
            assert_eq!(global(conn, &user).balance, 120);

            sweep(conn, &RecordingNotifier::default(), now()).unwrap();
            assert_eq!(global(conn, &user).balance, 100);
            assert_eq!(per_venue(conn, &user, &spent_down.id).balance, 0);
            assert_eq!(per_venue(conn, &user, &untouched.id).balance, 100);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_expiry_warning_is_sent_once() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let user = unique("user");
            let earned_at = now() - Duration::days(360);
            earn(conn, &venue.id, &user, "40", earned_at);
            earn(conn, &venue.id, &user, "10", earned_at + Duration::days(1));

            let notifier = RecordingNotifier::default();
            sweep(conn, &notifier, now()).unwrap();
            let mine: Vec<LoyaltyEvent> = notifier
                .take()
                .into_iter()
                .filter(|event| matches!(event, LoyaltyEvent::PointsExpiringSoon { user_id, .. } if *user_id == user))
                .collect();
            assert_eq!(
                mine,
                vec![LoyaltyEvent::PointsExpiringSoon {
                    user_id: user.clone(),
                    venue_id: venue.id.clone(),
                    points: 50,
                    nearest_expiry: earned_at + Duration::days(365),
                }]
            );
            // warned, not expired
            assert_eq!(global(conn, &user).balance, 50);

            sweep(conn, &notifier, now() + Duration::hours(1)).unwrap();
            assert!(!notifier
                .take()
                .iter()
                .any(|event| matches!(event, LoyaltyEvent::PointsExpiringSoon { user_id, .. } if *user_id == user)));
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_manual_expiry_for_one_venue() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let first = insert_venue(conn);
            let second = insert_venue(conn);
            let user = unique("user");
            earn(conn, &first.id, &user, "60", now());
            earn(conn, &second.id, &user, "40", now());

            let expiry = sweep_user(conn, &user, Some(&first.id), now()).unwrap();
            assert_eq!(expiry.lots_expired, 1);
            assert_eq!(expiry.points_expired, 60);
            assert_eq!(expiry.new_balance, 40);
            assert_eq!(per_venue(conn, &user, &first.id).balance, 0);
            assert_eq!(per_venue(conn, &user, &second.id).balance, 40);

            let rest = sweep_user(conn, &user, None, now()).unwrap();
            assert_eq!(rest.points_expired, 40);
            assert_eq!(rest.new_balance, 0);

            let nothing = sweep_user(conn, &user, None, now()).unwrap();
            assert_eq!(nothing.lots_expired, 0);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_manual_expiry_of_unknown_user() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let err = sweep_user(conn, &unique("nobody"), None, now()).unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(Entity::User, _)));
            Ok(())
        });
    }
}
