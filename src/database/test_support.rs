use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use diesel::{PgConnection, RunQueryDsl};
use once_cell::sync::OnceCell;

use crate::config::Config;
use crate::database::connect::{create_db_connection_pool, run_migrations, DbPool};
use crate::database::idgen;
use crate::database::mint::{mint, MintMetadata};
use crate::database::models::{NewVenue, Venue};
use crate::database::redeem::redeem;
use crate::ledger::UnitKind;
use crate::notify::testing::RecordingNotifier;

static POOL: OnceCell<DbPool> = OnceCell::new();

/// Pool against `DATABASE_URL` with migrations applied. Storage tests need a
/// running Postgres and fail without one.
pub fn test_pool() -> DbPool {
    POOL.get_or_init(|| {
        dotenvy::dotenv().ok();
        let config = Config::from_env().expect("DATABASE_URL must be set");
        let pool = create_db_connection_pool(&config).expect("failed to create test pool");
        run_migrations(&pool).expect("failed to run migrations");
        pool
    })
    .clone()
}

/// Wednesday noon, outside any bonus window used by the tests.
pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 3)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", idgen::next())
}

pub fn decimal(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub struct VenueFixture {
    pub multiplier: &'static str,
    pub points_per_purchase: Option<i32>,
    pub bonus_hours: Option<serde_json::Value>,
    pub is_active: bool,
}

impl Default for VenueFixture {
    fn default() -> Self {
        Self {
            multiplier: "1.0",
            points_per_purchase: None,
            bonus_hours: None,
            is_active: true,
        }
    }
}

impl VenueFixture {
    pub fn insert(self, conn: &mut PgConnection) -> Venue {
        use crate::schema::venue::dsl::*;
        let record = NewVenue {
            id: unique("venue"),
            name: "Test Venue".to_string(),
            is_active: self.is_active,
            points_multiplier: decimal(self.multiplier),
            points_per_purchase: self.points_per_purchase,
            bonus_hours: self.bonus_hours,
            utc_offset_minutes: 0,
            created_at: now(),
        };
        diesel::insert_into(venue)
            .values(&record)
            .get_result::<Venue>(conn)
            .unwrap()
    }
}

pub fn insert_venue(conn: &mut PgConnection) -> Venue {
    VenueFixture::default().insert(conn)
}

/// Mints a code for `amount` and redeems it for the user, both at `at`.
pub fn earn(conn: &mut PgConnection, venue_id: &str, user_id: &str, amount: &str, at: NaiveDateTime) -> i64 {
    let unit = mint(conn, venue_id, &decimal(amount), UnitKind::Code, MintMetadata::default(), at).unwrap();
    redeem(conn, &RecordingNotifier::default(), &unit.identifier, user_id, at)
        .unwrap()
        .points_earned
}
