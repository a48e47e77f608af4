use std::ops::DerefMut;
use std::str::FromStr;

use actix_request_identifier::RequestId;
use actix_web::{get, http::header, post, web, HttpRequest, HttpResponse};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use diesel::PgConnection;
use serde::Deserialize;
use tracing::{error, instrument};

use crate::database::connect::DbPool;
use crate::database::mint::MintMetadata;
use crate::database::{expiry, mint, mutations, queries, redeem};
use crate::error::LedgerResult;
use crate::ledger::UnitKind;
use crate::notify::Notifier;
use crate::proto::{self, GenericOutput};
use crate::responses;

// runs blocking diesel work on the thread pool with its own connection
async fn blocking<T, F>(db: &web::Data<DbPool>, f: F) -> Result<LedgerResult<T>, actix_web::Error>
where
    F: FnOnce(&mut PgConnection) -> LedgerResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    web::block(move || {
        let mut conn = db.get()?;
        f(conn.deref_mut())
    })
    .await
    .map_err(|e| {
        error!("{e}");
        actix_web::error::ErrorInternalServerError(e)
    })
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[post("/venues/{venue_id}/units")]
#[instrument(skip(db, req, input), fields(request_id = request_id.as_str()))]
pub async fn mint_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    req: HttpRequest,
    venue_id: web::Path<String>,
    input: web::Json<proto::MintInput>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);

    let purchase_amount = match BigDecimal::from_str(input.purchase_amount.trim()) {
        Ok(amount) => amount,
        Err(_) => return Ok(responses::bad_parameter_http_response("purchase_amount", is_protobuf)),
    };
    let kind = match non_empty(&input.kind) {
        None => UnitKind::Code,
        Some(kind) => match kind.parse::<UnitKind>() {
            Ok(kind) => kind,
            Err(_) => return Ok(responses::bad_parameter_http_response("kind", is_protobuf)),
        },
    };
    // if metadata is not empty, check if it is valid json
    let extra = match non_empty(&input.metadata) {
        None => None,
        Some(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(json) => Some(json),
            Err(_) => return Ok(responses::bad_parameter_http_response("metadata", is_protobuf)),
        },
    };
    let metadata = MintMetadata {
        issued_by: non_empty(&input.issued_by),
        client_ip: req.connection_info().realip_remote_addr().map(str::to_string),
        extra,
    };

    let venue_id = venue_id.into_inner();
    let now = Utc::now().naive_utc();
    let result = blocking(&db, move |conn| {
        mint::mint(conn, &venue_id, &purchase_amount, kind, metadata, now)
    })
    .await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |unit| GenericOutput {
        unit: Some(unit.into()),
        ..Default::default()
    }))
}

#[get("/units/{identifier}/status")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn unit_status_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    identifier: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let identifier = identifier.into_inner();
    let now = Utc::now().naive_utc();
    let result = blocking(&db, move |conn| redeem::check_status(conn, &identifier, now)).await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |status| GenericOutput {
        unit_status: Some(status.into()),
        ..Default::default()
    }))
}

#[post("/redeem")]
#[instrument(skip(db, notifier, input), fields(request_id = request_id.as_str()))]
pub async fn redeem_handler(
    db: web::Data<DbPool>,
    notifier: web::Data<dyn Notifier>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    input: web::Json<proto::RedeemInput>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);

    let Some(identifier) = non_empty(&input.identifier) else {
        return Ok(responses::bad_parameter_http_response("identifier", is_protobuf));
    };
    let Some(user_id) = non_empty(&input.user_id) else {
        return Ok(responses::bad_parameter_http_response("user_id", is_protobuf));
    };

    let notifier = notifier.into_inner();
    let now = Utc::now().naive_utc();
    let req_user_id = user_id.clone();
    let result = blocking(&db, move |conn| {
        redeem::redeem(conn, notifier.as_ref(), &identifier, &req_user_id, now)
    })
    .await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |redemption| GenericOutput {
        redemption: Some(responses::redemption_data(redemption, &user_id)),
        ..Default::default()
    }))
}

#[post("/spend")]
#[instrument(skip(db, input), fields(request_id = request_id.as_str()))]
pub async fn spend_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    input: web::Json<proto::SpendInput>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);

    let Some(user_id) = non_empty(&input.user_id) else {
        return Ok(responses::bad_parameter_http_response("user_id", is_protobuf));
    };
    let Some(venue_id) = non_empty(&input.venue_id) else {
        return Ok(responses::bad_parameter_http_response("venue_id", is_protobuf));
    };
    if input.points <= 0 {
        return Ok(responses::bad_parameter_http_response("points", is_protobuf));
    }

    let points = input.points;
    let order_id = non_empty(&input.order_id);
    let description = non_empty(&input.description);
    let now = Utc::now().naive_utc();
    let result = blocking(&db, move |conn| {
        mutations::spend(
            conn,
            &user_id,
            &venue_id,
            points,
            order_id.as_deref(),
            description.as_deref(),
            now,
        )
    })
    .await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |spent| GenericOutput {
        spend: Some(spent.into()),
        ..Default::default()
    }))
}

#[get("/balance/{user_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn balance_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    user_id: web::Path<String>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let user_id = user_id.into_inner();
    let result = blocking(&db, move |conn| queries::load_user_balance(conn, &user_id)).await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |view| GenericOutput {
        user_balance: Some(view.into()),
        ..Default::default()
    }))
}

#[get("/balance/{user_id}/venues/{venue_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn user_venue_balance_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let (user_id, venue_id) = path.into_inner();
    let result = blocking(&db, move |conn| {
        queries::load_user_venue_balance(conn, &user_id, &venue_id)
    })
    .await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |view| GenericOutput {
        user_venue_balance: Some(view.into()),
        ..Default::default()
    }))
}

#[derive(Debug, Deserialize)]
pub struct VenueBalanceQuery {
    pub since: Option<NaiveDate>,
}

#[get("/venues/{venue_id}/balance")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn venue_balance_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    venue_id: web::Path<String>,
    query: web::Query<VenueBalanceQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let venue_id = venue_id.into_inner();
    let since = query.since;
    let result = blocking(&db, move |conn| queries::load_venue_balance(conn, &venue_id, since)).await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |view| GenericOutput {
        venue_balance: Some(view.into()),
        ..Default::default()
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub venue_id: Option<String>,
    pub limit: Option<i64>,
}

#[get("/ledger/{user_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn ledger_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    user_id: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let user_id = user_id.into_inner();
    let HistoryQuery { venue_id, limit } = query.into_inner();
    let req_user_id = user_id.clone();
    let result = blocking(&db, move |conn| {
        queries::ledger_history(conn, &req_user_id, venue_id.as_deref(), limit)
    })
    .await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |entries| GenericOutput {
        ledger: Some(responses::ledger_history_data(&user_id, entries)),
        ..Default::default()
    }))
}

#[post("/sweep")]
#[instrument(skip(db, notifier), fields(request_id = request_id.as_str()))]
pub async fn sweep_handler(
    db: web::Data<DbPool>,
    notifier: web::Data<dyn Notifier>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let notifier = notifier.into_inner();
    let now = Utc::now().naive_utc();
    let result = blocking(&db, move |conn| expiry::sweep(conn, notifier.as_ref(), now)).await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |summary| GenericOutput {
        sweep: Some(summary.into()),
        ..Default::default()
    }))
}

#[derive(Debug, Deserialize)]
pub struct SweepUserQuery {
    pub venue_id: Option<String>,
}

#[post("/sweep/{user_id}")]
#[instrument(skip(db), fields(request_id = request_id.as_str()))]
pub async fn sweep_user_handler(
    db: web::Data<DbPool>,
    request_id: RequestId,
    accept: web::Header<header::Accept>,
    user_id: web::Path<String>,
    query: web::Query<SweepUserQuery>,
) -> Result<HttpResponse, actix_web::Error> {
    let is_protobuf = responses::wants_protobuf(&accept);
    let user_id = user_id.into_inner();
    let venue_id = query.into_inner().venue_id;
    let now = Utc::now().naive_utc();
    let result = blocking(&db, move |conn| {
        expiry::sweep_user(conn, &user_id, venue_id.as_deref(), now)
    })
    .await?;
    Ok(responses::ledger_http_response(result, is_protobuf, |expiry| GenericOutput {
        user_expiry: Some(expiry.into()),
        ..Default::default()
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(mint_handler)
        .service(unit_status_handler)
        .service(redeem_handler)
        .service(spend_handler)
        .service(balance_handler)
        .service(user_venue_balance_handler)
        .service(venue_balance_handler)
        .service(ledger_handler)
        .service(sweep_handler)
        .service(sweep_user_handler);
}
