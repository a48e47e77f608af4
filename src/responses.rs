use actix_web::http::{header, StatusCode};
use actix_web::HttpResponse;
use chrono::NaiveDateTime;
use prost::Message;
use prost_wkt_types::Timestamp;
use tracing::error;

use crate::database::expiry::{SweepSummary, UserExpiry};
use crate::database::models::{LedgerEntry, PointLot, RedeemableUnit, VenueDailyStats};
use crate::database::mutations::SpendResult;
use crate::database::queries::{UserBalanceView, UserVenueBalanceView, VenueBalanceView};
use crate::database::redeem::{RedemptionResult, UnitStatus};
use crate::error::LedgerError;
use crate::proto::{
    error, BadParameterError, Error, GenericOutput, InactiveVenueError, InsufficientBalanceError, LedgerEntryData,
    LedgerHistoryData, NotFoundError, PointLotData, RedemptionData, SpendData, SweepData, UnavailableError,
    UnitData, UnitRejectedError, UnitStatusData, UserBalanceData, UserExpiryData, UserVenueBalanceData,
    VenueBalanceData, VenueDailyStatsData,
};

const PROTOBUF: &str = "application/x-protobuf";

pub fn wants_protobuf(accept: &header::Accept) -> bool {
    accept.iter().any(|a| a.item.essence_str() == PROTOBUF)
}

fn timestamp(at: NaiveDateTime) -> Timestamp {
    let at = at.and_utc();
    Timestamp {
        seconds: at.timestamp(),
        nanos: at.timestamp_subsec_nanos() as i32,
    }
}

impl From<RedeemableUnit> for UnitData {
    fn from(unit: RedeemableUnit) -> Self {
        UnitData {
            multiplier: (&unit.multiplier * &unit.bonus_multiplier).to_string(),
            identifier: unit.identifier,
            kind: unit.kind,
            venue_id: unit.venue_id,
            points: unit.points,
            purchase_amount: unit.purchase_amount.to_string(),
            is_bonus: unit.is_bonus,
            used: unit.used,
            expires_at: Some(timestamp(unit.expires_at)),
        }
    }
}

impl From<UnitStatus> for UnitStatusData {
    fn from(status: UnitStatus) -> Self {
        UnitStatusData {
            identifier: status.identifier,
            valid: status.valid,
            reason: status.reason.map(|r| r.as_str().to_string()).unwrap_or_default(),
            unit: status.unit.map(UnitData::from),
        }
    }
}

impl From<SpendResult> for SpendData {
    fn from(result: SpendResult) -> Self {
        SpendData {
            entry_id: result.entry_id,
            points_spent: result.points_spent,
            new_balance: result.new_balance,
            venue_balance: result.venue_balance,
            replayed: result.replayed,
        }
    }
}

impl From<PointLot> for PointLotData {
    fn from(lot: PointLot) -> Self {
        PointLotData {
            id: lot.id,
            venue_id: lot.venue_id,
            points: lot.points,
            earned_at: Some(timestamp(lot.earned_at)),
            expires_at: Some(timestamp(lot.expires_at)),
        }
    }
}

impl From<UserBalanceView> for UserBalanceData {
    fn from(view: UserBalanceView) -> Self {
        UserBalanceData {
            user_id: view.balance.user_id,
            balance: view.balance.balance,
            lifetime_earned: view.balance.lifetime_earned,
            lifetime_spent: view.balance.lifetime_spent,
            lots: view.lots.into_iter().map(PointLotData::from).collect(),
        }
    }
}

impl From<UserVenueBalanceView> for UserVenueBalanceData {
    fn from(view: UserVenueBalanceView) -> Self {
        let balance = view.balance;
        UserVenueBalanceData {
            user_id: balance.user_id,
            venue_id: balance.venue_id,
            balance: balance.balance,
            lifetime_earned: balance.lifetime_earned,
            lifetime_spent: balance.lifetime_spent,
            lifetime_expired: balance.lifetime_expired,
            tier_points: balance.tier_points,
            tier: view.progress.tier.as_str().to_string(),
            next_tier: view.progress.next_tier.map(|t| t.as_str().to_string()),
            points_to_next: view.progress.points_to_next,
            visit_count: balance.visit_count,
            first_visit_at: balance.first_visit_at.map(timestamp),
            last_visit_at: balance.last_visit_at.map(timestamp),
        }
    }
}

impl From<VenueDailyStats> for VenueDailyStatsData {
    fn from(stats: VenueDailyStats) -> Self {
        VenueDailyStatsData {
            day: stats.day.format("%Y-%m-%d").to_string(),
            points_issued: stats.points_issued,
            points_redeemed: stats.points_redeemed,
            revenue: stats.revenue.to_string(),
            order_count: stats.order_count,
        }
    }
}

impl From<VenueBalanceView> for VenueBalanceData {
    fn from(view: VenueBalanceView) -> Self {
        VenueBalanceData {
            venue_id: view.balance.venue_id,
            points_issued: view.balance.points_issued,
            points_redeemed: view.balance.points_redeemed,
            revenue: view.balance.revenue.to_string(),
            order_count: view.balance.order_count,
            user_count: view.balance.user_count,
            daily: view.daily.into_iter().map(VenueDailyStatsData::from).collect(),
        }
    }
}

impl From<LedgerEntry> for LedgerEntryData {
    fn from(entry: LedgerEntry) -> Self {
        LedgerEntryData {
            id: entry.id,
            venue_id: entry.venue_id,
            kind: entry.kind,
            points: entry.points,
            balance_after: entry.balance_after,
            description: entry.description,
            purchase_amount: entry.purchase_amount.map(|v| v.to_string()),
            unit_identifier: entry.unit_identifier,
            order_id: entry.order_id,
            created_at: Some(timestamp(entry.created_at)),
        }
    }
}

impl From<SweepSummary> for SweepData {
    fn from(summary: SweepSummary) -> Self {
        SweepData {
            users_processed: summary.users_processed as u64,
            users_failed: summary.users_failed as u64,
            points_expired: summary.points_expired,
            transactions_created: summary.transactions_created as u64,
            warnings_sent: summary.warnings_sent as u64,
        }
    }
}

impl From<UserExpiry> for UserExpiryData {
    fn from(expiry: UserExpiry) -> Self {
        UserExpiryData {
            user_id: expiry.user_id,
            lots_expired: expiry.lots_expired as u64,
            points_expired: expiry.points_expired,
            new_balance: expiry.new_balance,
        }
    }
}

pub fn redemption_data(result: RedemptionResult, user_id: &str) -> RedemptionData {
    RedemptionData {
        identifier: result.identifier,
        user_id: user_id.to_string(),
        venue_id: result.venue_id,
        points_earned: result.points_earned,
        new_balance: result.new_balance,
        venue_balance: result.venue_balance,
        is_bonus: result.is_bonus,
        tier: result.tier.as_str().to_string(),
    }
}

pub fn ledger_history_data(user_id: &str, entries: Vec<LedgerEntry>) -> LedgerHistoryData {
    LedgerHistoryData {
        user_id: user_id.to_string(),
        entries: entries.into_iter().map(LedgerEntryData::from).collect(),
    }
}

fn error_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::NotFound(..) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyUsed(_) | LedgerError::InsufficientBalance { .. } => StatusCode::CONFLICT,
        LedgerError::Expired(_) => StatusCode::GONE,
        LedgerError::InvalidValue(_) | LedgerError::InactiveVenue(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::GenerationExhausted(_) | LedgerError::Database(_) | LedgerError::Pool(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

pub fn error_output(err: &LedgerError) -> Error {
    let one_error = match err {
        LedgerError::NotFound(entity, id) => error::OneError::NotFound(NotFoundError {
            entity: entity.to_string(),
            id: id.clone(),
        }),
        LedgerError::AlreadyUsed(identifier) => error::OneError::AlreadyUsed(UnitRejectedError {
            identifier: identifier.clone(),
        }),
        LedgerError::Expired(identifier) => error::OneError::Expired(UnitRejectedError {
            identifier: identifier.clone(),
        }),
        LedgerError::InvalidValue(_) => error::OneError::BadParameter(BadParameterError {
            name: "value".to_string(),
        }),
        LedgerError::InsufficientBalance { available, requested } => {
            error::OneError::InsufficientBalance(InsufficientBalanceError {
                available: *available,
                requested: *requested,
            })
        }
        LedgerError::InactiveVenue(venue_id) => error::OneError::InactiveVenue(InactiveVenueError {
            venue_id: venue_id.clone(),
        }),
        LedgerError::GenerationExhausted(_) | LedgerError::Database(_) | LedgerError::Pool(_) => {
            error::OneError::Unavailable(UnavailableError {
                reason: err.code().to_string(),
            })
        }
    };
    // storage details stay in the logs
    let message = if err.is_retryable() {
        "temporarily unavailable, retry later".to_string()
    } else {
        err.to_string()
    };
    Error {
        code: err.code().to_string(),
        message,
        one_error: Some(one_error),
    }
}

pub fn http_response(status: StatusCode, data: GenericOutput, is_protobuf: bool) -> HttpResponse {
    if is_protobuf {
        HttpResponse::build(status)
            .content_type(PROTOBUF)
            .body(data.encode_to_vec())
    } else {
        HttpResponse::build(status).json(data)
    }
}

pub fn ok_http_response(data: GenericOutput, is_protobuf: bool) -> HttpResponse {
    http_response(StatusCode::OK, data, is_protobuf)
}

pub fn error_http_response(err: &LedgerError, is_protobuf: bool) -> HttpResponse {
    if err.is_retryable() {
        error!(error = %err, "storage failure");
    }
    let data = GenericOutput {
        error: Some(error_output(err)),
        ..Default::default()
    };
    http_response(error_status(err), data, is_protobuf)
}

pub fn bad_parameter_http_response(field: &str, is_protobuf: bool) -> HttpResponse {
    let data = GenericOutput {
        error: Some(Error {
            code: "bad_parameter".to_string(),
            message: format!("invalid parameter: {field}"),
            one_error: Some(error::OneError::BadParameter(BadParameterError {
                name: field.to_string(),
            })),
        }),
        ..Default::default()
    };
    http_response(StatusCode::BAD_REQUEST, data, is_protobuf)
}

/// Success goes through `to_output`, failures become an error envelope.
pub fn ledger_http_response<T>(
    result: Result<T, LedgerError>,
    is_protobuf: bool,
    to_output: impl FnOnce(T) -> GenericOutput,
) -> HttpResponse {
    match result {
        Ok(value) => ok_http_response(to_output(value), is_protobuf),
        Err(e) => error_http_response(&e, is_protobuf),
    }
}
