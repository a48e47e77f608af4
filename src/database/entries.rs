//! Append-only ledger entry store.

use chrono::NaiveDateTime;
use diesel::{PgConnection, RunQueryDsl};

use crate::database::idgen;
use crate::database::models::NewLedgerEntry;
use crate::error::LedgerResult;
use crate::ledger::EntryKind;

impl NewLedgerEntry {
    pub fn new(
        kind: EntryKind,
        user_id: &str,
        venue_id: &str,
        points: i64,
        balance_after: i64,
        description: String,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: idgen::next(),
            user_id: user_id.to_string(),
            venue_id: venue_id.to_string(),
            kind: kind.as_str().to_string(),
            points,
            balance_after,
            description,
            purchase_amount: None,
            multiplier: None,
            unit_identifier: None,
            order_id: None,
            lot_id: None,
            created_at: now,
        }
    }
}

/// Entries are only ever inserted, never updated or deleted.
pub fn append(conn: &mut PgConnection, entries: &[NewLedgerEntry]) -> LedgerResult<usize> {
    if entries.is_empty() {
        return Ok(0);
    }
    use crate::schema::ledger_entry::dsl::*;
    Ok(diesel::insert_into(ledger_entry).values(entries).execute(conn)?)
}
