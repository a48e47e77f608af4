//! Shared vocabulary of the points ledger: entry kinds, redeemable unit kinds,
//! lot states and the retention constants every service agrees on.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Earned points stay spendable this long before the sweeper ages them out.
pub const LOT_LIFETIME_DAYS: i64 = 365;

/// Lots expiring within this window trigger an "expiring soon" notification.
pub const EXPIRY_WARNING_DAYS: i64 = 7;

/// Identifier collisions are retried this many times before giving up.
pub const MAX_GENERATION_ATTEMPTS: u32 = 10;

/// Flat award when a venue does not configure `points_per_purchase`.
pub const DEFAULT_POINTS_PER_PURCHASE: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Earned,
    Spent,
    Expired,
    Bonus,
    Referral,
    AdminAdjustment,
    Refund,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Earned => "earned",
            EntryKind::Spent => "spent",
            EntryKind::Expired => "expired",
            EntryKind::Bonus => "bonus",
            EntryKind::Referral => "referral",
            EntryKind::AdminAdjustment => "admin_adjustment",
            EntryKind::Refund => "refund",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earned" => Ok(EntryKind::Earned),
            "spent" => Ok(EntryKind::Spent),
            "expired" => Ok(EntryKind::Expired),
            "bonus" => Ok(EntryKind::Bonus),
            "referral" => Ok(EntryKind::Referral),
            "admin_adjustment" => Ok(EntryKind::AdminAdjustment),
            "refund" => Ok(EntryKind::Refund),
            other => Err(format!("unknown ledger entry kind: {other}")),
        }
    }
}

/// The two shapes of a redeemable unit. Both share one lifecycle and differ
/// only in identifier shape and time to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Six characters typed in by a cashier.
    Code,
    /// Long opaque id rendered as a QR code and scanned by the customer.
    QrTransaction,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Code => "code",
            UnitKind::QrTransaction => "qr",
        }
    }

    pub fn ttl(&self) -> Duration {
        match self {
            UnitKind::Code => Duration::hours(24),
            UnitKind::QrTransaction => Duration::minutes(30),
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(UnitKind::Code),
            "qr" | "qr_transaction" => Ok(UnitKind::QrTransaction),
            other => Err(format!("unknown redeemable unit kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LotStatus {
    Active,
    Expired,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Active => "active",
            LotStatus::Expired => "expired",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_round_trips_through_storage_names() {
        for kind in [
            EntryKind::Earned,
            EntryKind::Spent,
            EntryKind::Expired,
            EntryKind::Bonus,
            EntryKind::Referral,
            EntryKind::AdminAdjustment,
            EntryKind::Refund,
        ] {
            assert_eq!(kind.as_str().parse::<EntryKind>(), Ok(kind));
        }
        assert!("transfer".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_unit_kind_ttl() {
        assert_eq!(UnitKind::Code.ttl(), Duration::hours(24));
        assert_eq!(UnitKind::QrTransaction.ttl(), Duration::minutes(30));
        assert_eq!("qr".parse::<UnitKind>(), Ok(UnitKind::QrTransaction));
        assert_eq!("code".parse::<UnitKind>(), Ok(UnitKind::Code));
    }
}
