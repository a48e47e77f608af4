use chrono::NaiveDateTime;
use diesel::{Connection, ExpressionMethods, OptionalExtension, PgConnection, QueryDsl, RunQueryDsl};
use tracing::{info, instrument};

use crate::database::balances::{
    add_daily_stats, lock_existing_user_balance, lock_existing_user_venue_balance, lock_venue_balance,
    save_user_balance, save_user_venue_balance, save_venue_balance, DailyDelta,
};
use crate::database::entries;
use crate::database::models::{LedgerEntry, NewLedgerEntry};
use crate::error::{Entity, LedgerError, LedgerResult};
use crate::ledger::EntryKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendResult {
    pub entry_id: i64,
    pub points_spent: i64,
    pub new_balance: i64,
    pub venue_balance: i64,
    /// True when `order_id` had already been spent and nothing changed.
    pub replayed: bool,
}

// earlier spend for the same order, if any
fn find_spend(conn: &mut PgConnection, req_user_id: &str, req_order_id: &str) -> LedgerResult<Option<LedgerEntry>> {
    use crate::schema::ledger_entry::dsl::*;
    Ok(ledger_entry
        .filter(user_id.eq(req_user_id))
        .filter(kind.eq(EntryKind::Spent.as_str()))
        .filter(order_id.eq(req_order_id))
        .first::<LedgerEntry>(conn)
        .optional()?)
}

/// Spends points at a venue. Fails closed when the user's balance at that
/// venue cannot cover the amount. Repeating a spend with the same `order_id`
/// returns the original outcome.
#[instrument(skip(conn))]
pub fn spend(
    conn: &mut PgConnection,
    req_user_id: &str,
    req_venue_id: &str,
    points: i64,
    req_order_id: Option<&str>,
    description: Option<&str>,
    now: NaiveDateTime,
) -> LedgerResult<SpendResult> {
    if points <= 0 {
        return Err(LedgerError::InvalidValue(format!("points must be positive, got {points}")));
    }

    // wrap in transaction
    let result = conn.transaction::<_, LedgerError, _>(|conn| {
        let mut user = lock_existing_user_balance(conn, req_user_id)?
            .ok_or_else(|| LedgerError::NotFound(Entity::User, req_user_id.to_string()))?;

        // idempotency check, under the user lock
        if let Some(req_order_id) = req_order_id {
            if let Some(previous) = find_spend(conn, req_user_id, req_order_id)? {
                let venue_balance = lock_existing_user_venue_balance(conn, req_user_id, &previous.venue_id)?
                    .map_or(0, |rec| rec.balance);
                return Ok(SpendResult {
                    entry_id: previous.id,
                    points_spent: -previous.points,
                    new_balance: user.balance,
                    venue_balance,
                    replayed: true,
                });
            }
        }

        let mut user_venue = lock_existing_user_venue_balance(conn, req_user_id, req_venue_id)?.ok_or(
            LedgerError::InsufficientBalance {
                available: 0,
                requested: points,
            },
        )?;
        user_venue.debit(points)?;
        user.debit(points)?;

        let (mut aggregate, _) = lock_venue_balance(conn, req_venue_id, now)?;
        aggregate.record_redeemed(points);
        add_daily_stats(
            conn,
            req_venue_id,
            now.date(),
            &DailyDelta {
                points_redeemed: points,
                ..Default::default()
            },
        )?;

        let mut entry = NewLedgerEntry::new(
            EntryKind::Spent,
            req_user_id,
            req_venue_id,
            -points,
            user.balance,
            description.map_or_else(|| format!("Spent {points} points"), str::to_string),
            now,
        );
        entry.order_id = req_order_id.map(str::to_string);
        let entry_id = entry.id;
        entries::append(conn, &[entry])?;

        save_user_balance(conn, &user, now)?;
        save_user_venue_balance(conn, &user_venue)?;
        save_venue_balance(conn, &aggregate, now)?;

        Ok(SpendResult {
            entry_id,
            points_spent: points,
            new_balance: user.balance,
            venue_balance: user_venue.balance,
            replayed: false,
        })
    })?;

    if !result.replayed {
        info!(points, new_balance = result.new_balance, "spent points");
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::VenueBalance;
    use crate::database::test_support::{earn, insert_venue, now, test_pool, unique};
    use diesel::result::Error;

    #[actix_web::test]
    async fn test_spend() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let user = unique("user");
            earn(conn, &venue.id, &user, "120", now());

            let spent = spend(conn, &user, &venue.id, 70, Some("order-1"), None, now()).unwrap();
            assert_eq!(spent.points_spent, 70);
            assert_eq!(spent.new_balance, 50);
            assert_eq!(spent.venue_balance, 50);
            assert!(!spent.replayed);

            let (balance, lifetime_spent): (i64, i64) = {
                use crate::schema::user_balance::dsl::*;
                user_balance
                    .filter(user_id.eq(&user))
                    .select((balance, lifetime_spent))
                    .first(conn)?
            };
            assert_eq!((balance, lifetime_spent), (50, 70));

            let aggregate: VenueBalance = {
                use crate::schema::venue_balance::dsl::*;
                venue_balance.filter(venue_id.eq(&venue.id)).first(conn)?
            };
            assert_eq!(aggregate.points_redeemed, 70);

            let entry: LedgerEntry = {
                use crate::schema::ledger_entry::dsl::*;
                ledger_entry.filter(id.eq(spent.entry_id)).first(conn)?
            };
            assert_eq!(entry.kind, "spent");
            assert_eq!(entry.points, -70);
            assert_eq!(entry.balance_after, 50);
            assert_eq!(entry.order_id.as_deref(), Some("order-1"));
            assert_eq!(entry.description, "Spent 70 points");

            // same order again changes nothing
            let replay = spend(conn, &user, &venue.id, 70, Some("order-1"), None, now()).unwrap();
            assert!(replay.replayed);
            assert_eq!(replay.entry_id, spent.entry_id);
            assert_eq!(replay.new_balance, 50);
            Ok(())
        });
    }

    #[actix_web::test]
    async fn test_spend_fails_closed() {
        let pool = test_pool();
        pool.get().unwrap().test_transaction::<_, Error, _>(|conn| {
            let venue = insert_venue(conn);
            let other = insert_venue(conn);
            let user = unique("user");
            earn(conn, &venue.id, &user, "30", now());

            let err = spend(conn, &user, &venue.id, 31, None, None, now()).unwrap_err();
            assert!(matches!(
                err,
                LedgerError::InsufficientBalance {
                    available: 30,
                    requested: 31
                }
            ));

            // points earned elsewhere cannot be spent here
            let err = spend(conn, &user, &other.id, 10, None, None, now()).unwrap_err();
            assert!(matches!(err, LedgerError::InsufficientBalance { available: 0, .. }));

            let err = spend(conn, &unique("nobody"), &venue.id, 10, None, None, now()).unwrap_err();
            assert!(matches!(err, LedgerError::NotFound(Entity::User, _)));

            let err = spend(conn, &user, &venue.id, 0, None, None, now()).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidValue(_)));

            let balance: i64 = {
                use crate::schema::user_balance::dsl::*;
                user_balance.filter(user_id.eq(&user)).select(balance).first(conn)?
            };
            assert_eq!(balance, 30);
            Ok(())
        });
    }
}
