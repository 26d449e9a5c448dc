//! Coupon catalog and issuance endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{CouponId, UserId};
use domain::{Coupon, CouponRepository, IssuanceError, UserCoupon};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::{AppState, Backends};

// -- Request types --

#[derive(Deserialize)]
pub struct CreateCouponRequest {
    pub name: String,
    pub discount_rate: i32,
    pub total_quantity: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub validity_days: i32,
}

#[derive(Deserialize)]
pub struct IssueCouponRequest {
    pub user_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct CouponResponse {
    pub id: CouponId,
    pub name: String,
    pub discount_rate: i32,
    pub total_quantity: i32,
    pub issued_quantity: i32,
    pub remaining_quantity: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl From<&Coupon> for CouponResponse {
    fn from(coupon: &Coupon) -> Self {
        Self {
            id: coupon.id(),
            name: coupon.name().to_string(),
            discount_rate: coupon.discount_rate(),
            total_quantity: coupon.total_quantity(),
            issued_quantity: coupon.issued_quantity(),
            remaining_quantity: coupon.remaining(),
            valid_from: coupon.valid_from(),
            valid_until: coupon.valid_until(),
        }
    }
}

fn parse_coupon_id(id: &str) -> Result<CouponId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid coupon ID: {id}")))
}

/// POST /coupons
pub async fn create<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Json(req): Json<CreateCouponRequest>,
) -> Result<(StatusCode, Json<CouponResponse>), ApiError> {
    let coupon = Coupon::new(
        req.name,
        req.discount_rate,
        req.total_quantity,
        req.valid_from,
        req.valid_until,
        req.validity_days,
    )?;
    state
        .coupons
        .repository()
        .create(&coupon)
        .await
        .map_err(IssuanceError::from)?;

    tracing::info!(coupon_id = %coupon.id(), total = coupon.total_quantity(), "coupon created");
    Ok((StatusCode::CREATED, Json(CouponResponse::from(&coupon))))
}

/// GET /coupons/{id}
pub async fn get<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
) -> Result<Json<CouponResponse>, ApiError> {
    let coupon_id = parse_coupon_id(&id)?;
    let coupon = state
        .coupons
        .repository()
        .find(coupon_id)
        .await
        .map_err(IssuanceError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("coupon {coupon_id} not found")))?;
    Ok(Json(CouponResponse::from(&coupon)))
}

/// POST /coupons/{id}/issue
pub async fn issue<B: Backends>(
    State(state): State<Arc<AppState<B>>>,
    Path(id): Path<String>,
    Json(req): Json<IssueCouponRequest>,
) -> Result<(StatusCode, Json<UserCoupon>), ApiError> {
    let coupon_id = parse_coupon_id(&id)?;
    let user_id: UserId = req
        .user_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user ID: {}", req.user_id)))?;

    let issued = state.coupons.issue(coupon_id, user_id).await?;
    Ok((StatusCode::CREATED, Json(issued)))
}
