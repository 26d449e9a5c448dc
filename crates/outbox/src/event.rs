//! Topics and the payloads published on them.
//!
//! Every payload serializes to camelCase JSON and carries a `timestamp` of
//! when the event was produced.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{CouponId, OrderId, PaymentId, UserCouponId, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Broker topics this system produces to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    OrderCreated,
    PaymentCompleted,
    CouponIssued,
}

impl Topic {
    pub const ALL: [Topic; 3] = [
        Topic::OrderCreated,
        Topic::PaymentCompleted,
        Topic::CouponIssued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::OrderCreated => "order-created",
            Topic::PaymentCompleted => "payment-completed",
            Topic::CouponIssued => "coupon-issued",
        }
    }

    /// Checks that `payload` is a well-formed message for this topic.
    pub fn validate_payload(&self, payload: &str) -> Result<(), serde_json::Error> {
        match self {
            Topic::OrderCreated => parse::<OrderCreated>(payload),
            Topic::PaymentCompleted => parse::<PaymentCompleted>(payload),
            Topic::CouponIssued => parse::<CouponIssued>(payload),
        }
    }
}

fn parse<T: DeserializeOwned>(payload: &str) -> Result<(), serde_json::Error> {
    serde_json::from_str::<T>(payload).map(|_| ())
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

/// A payload that belongs to exactly one topic.
pub trait DomainEvent: Serialize {
    const TOPIC: Topic;

    /// Partitioning key. Events sharing a key are delivered in order.
    fn key(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub product_ids: Vec<String>,
    pub items: Vec<OrderLine>,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for OrderCreated {
    const TOPIC: Topic = Topic::OrderCreated;

    fn key(&self) -> String {
        self.order_id.to_string()
    }
}

/// Amount is in minor currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for PaymentCompleted {
    const TOPIC: Topic = Topic::PaymentCompleted;

    // Keyed by order so payment events follow the order's creation event.
    fn key(&self) -> String {
        self.order_id.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponIssued {
    pub user_coupon_id: UserCouponId,
    pub user_id: UserId,
    pub coupon_id: CouponId,
    pub coupon_name: String,
    pub discount_rate: i32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent for CouponIssued {
    const TOPIC: Topic = Topic::CouponIssued;

    fn key(&self) -> String {
        self.coupon_id.to_string()
    }
}

/// A serialized event waiting to be handed to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub topic: Topic,
    pub key: String,
    pub payload: String,
}

impl OutboxEvent {
    pub fn from_event<E: DomainEvent>(event: &E) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: E::TOPIC,
            key: event.key(),
            payload: serde_json::to_string(event)?,
        })
    }
}
