use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Queryable, Debug, Clone)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub points_multiplier: BigDecimal,
    pub points_per_purchase: Option<i32>,
    pub bonus_hours: Option<serde_json::Value>,
    pub utc_offset_minutes: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::venue)]
pub struct NewVenue {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub points_multiplier: BigDecimal,
    pub points_per_purchase: Option<i32>,
    pub bonus_hours: Option<serde_json::Value>,
    pub utc_offset_minutes: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct RedeemableUnit {
    pub identifier: String,
    pub kind: String,
    pub venue_id: String,
    pub points: i64,
    pub purchase_amount: BigDecimal,
    pub multiplier: BigDecimal,
    pub bonus_multiplier: BigDecimal,
    pub is_bonus: bool,
    pub used: bool,
    pub used_by: Option<String>,
    pub used_at: Option<NaiveDateTime>,
    pub expires_at: NaiveDateTime,
    pub issued_by: Option<String>,
    pub client_ip: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
}

impl RedeemableUnit {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        now > self.expires_at
    }
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::redeemable_unit)]
pub struct NewRedeemableUnit {
    pub identifier: String,
    pub kind: String,
    pub venue_id: String,
    pub points: i64,
    pub purchase_amount: BigDecimal,
    pub multiplier: BigDecimal,
    pub bonus_multiplier: BigDecimal,
    pub is_bonus: bool,
    pub used: bool,
    pub expires_at: NaiveDateTime,
    pub issued_by: Option<String>,
    pub client_ip: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone, PartialEq, Eq)]
pub struct UserBalance {
    pub user_id: String,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub lifetime_spent: i64,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone, PartialEq, Eq)]
pub struct PointLot {
    pub id: i64,
    pub user_id: String,
    pub venue_id: String,
    pub points: i64,
    pub status: String,
    pub earned_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub expired_at: Option<NaiveDateTime>,
    pub warning_sent_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::point_lot)]
pub struct NewPointLot {
    pub id: i64,
    pub user_id: String,
    pub venue_id: String,
    pub points: i64,
    pub status: String,
    pub earned_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone, PartialEq, Eq)]
pub struct UserVenueBalance {
    pub user_id: String,
    pub venue_id: String,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub lifetime_spent: i64,
    pub lifetime_expired: i64,
    pub tier_points: i64,
    pub tier: String,
    pub visit_count: i32,
    pub first_visit_at: Option<NaiveDateTime>,
    pub last_visit_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct VenueBalance {
    pub venue_id: String,
    pub points_issued: i64,
    pub points_redeemed: i64,
    pub revenue: BigDecimal,
    pub order_count: i64,
    pub user_count: i64,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct VenueDailyStats {
    pub venue_id: String,
    pub day: NaiveDate,
    pub points_issued: i64,
    pub points_redeemed: i64,
    pub revenue: BigDecimal,
    pub order_count: i64,
}

#[derive(Queryable, Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub venue_id: String,
    pub kind: String,
    pub points: i64,
    pub balance_after: i64,
    pub description: String,
    pub purchase_amount: Option<BigDecimal>,
    pub multiplier: Option<BigDecimal>,
    pub unit_identifier: Option<String>,
    pub order_id: Option<String>,
    pub lot_id: Option<i64>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::ledger_entry)]
pub struct NewLedgerEntry {
    pub id: i64,
    pub user_id: String,
    pub venue_id: String,
    pub kind: String,
    pub points: i64,
    pub balance_after: i64,
    pub description: String,
    pub purchase_amount: Option<BigDecimal>,
    pub multiplier: Option<BigDecimal>,
    pub unit_identifier: Option<String>,
    pub order_id: Option<String>,
    pub lot_id: Option<i64>,
    pub created_at: NaiveDateTime,
}
