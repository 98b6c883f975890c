//! Best-effort side channels: member notifications and outbound webhooks.
//!
//! [`Dispatcher`] hands every message to a spawned task so that delivery
//! never blocks or fails the booking transaction that produced it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::models::{BookingId, ClassBooking, ClassSession, GymClass, MemberId, SessionId, TenantId};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    BookingConfirmed,
    WaitlistAdded { position: u32 },
    BookingCancelled { late: bool },
    WaitlistPromoted,
    SessionCancelled { reason: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub tenant_id: TenantId,
    pub member_id: MemberId,
    pub booking_id: BookingId,
    pub session_id: SessionId,
    pub class_name: String,
    pub session_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn for_booking(
        booking: &ClassBooking,
        session: &ClassSession,
        gym_class: &GymClass,
        kind: NotificationKind,
    ) -> Self {
        Self {
            tenant_id: booking.tenant_id,
            member_id: booking.member_id,
            booking_id: booking.id,
            session_id: session.id,
            class_name: gym_class.name.clone(),
            session_date: session.session_date,
            start_time: session.start_time,
            end_time: session.end_time,
            kind,
        }
    }
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), GatewayError>;
}

/// Writes notifications to the log; used when no delivery channel is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotificationGateway;

#[async_trait]
impl NotificationGateway for LogNotificationGateway {
    async fn send(&self, notification: &Notification) -> Result<(), GatewayError> {
        info!(
            member_id = %notification.member_id,
            session_id = %notification.session_id,
            kind = ?notification.kind,
            "Member notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WebhookEvent {
    #[serde(rename = "booking.created")]
    BookingCreated,
    #[serde(rename = "booking.confirmed")]
    BookingConfirmed,
    #[serde(rename = "booking.cancelled")]
    BookingCancelled,
    #[serde(rename = "booking.completed")]
    BookingCompleted,
    #[serde(rename = "booking.no_show")]
    BookingNoShow,
}

impl WebhookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::BookingCreated => "booking.created",
            WebhookEvent::BookingConfirmed => "booking.confirmed",
            WebhookEvent::BookingCancelled => "booking.cancelled",
            WebhookEvent::BookingCompleted => "booking.completed",
            WebhookEvent::BookingNoShow => "booking.no_show",
        }
    }
}

#[async_trait]
pub trait WebhookPublisher: Send + Sync {
    async fn publish(
        &self,
        event: WebhookEvent,
        booking_id: BookingId,
        tenant_id: TenantId,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogWebhookPublisher;

#[async_trait]
impl WebhookPublisher for LogWebhookPublisher {
    async fn publish(
        &self,
        event: WebhookEvent,
        booking_id: BookingId,
        tenant_id: TenantId,
    ) -> Result<(), GatewayError> {
        debug!(event = event.as_str(), %booking_id, %tenant_id, "Webhook event");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    event: WebhookEvent,
    booking_id: BookingId,
    tenant_id: TenantId,
    occurred_at: chrono::DateTime<Utc>,
}

/// Posts webhook events as JSON to a single endpoint.
#[derive(Clone)]
pub struct HttpWebhookPublisher {
    client: reqwest::Client,
    endpoint: Arc<Url>,
}

impl HttpWebhookPublisher {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: Arc::new(endpoint),
        })
    }
}

#[async_trait]
impl WebhookPublisher for HttpWebhookPublisher {
    async fn publish(
        &self,
        event: WebhookEvent,
        booking_id: BookingId,
        tenant_id: TenantId,
    ) -> Result<(), GatewayError> {
        let body = WebhookBody {
            event,
            booking_id,
            tenant_id,
            occurred_at: Utc::now(),
        };
        self.client
            .post(self.endpoint.as_str())
            .header("x-tenant-id", tenant_id.to_string())
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Side effects collected while locks are held and flushed after commit.
#[derive(Debug, Default)]
pub struct Outbox {
    notifications: Vec<Notification>,
    events: Vec<(WebhookEvent, BookingId, TenantId)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    pub fn publish(&mut self, event: WebhookEvent, booking: &ClassBooking) {
        self.events.push((event, booking.id, booking.tenant_id));
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.events.is_empty()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    gateway: Arc<dyn NotificationGateway>,
    webhooks: Arc<dyn WebhookPublisher>,
}

impl Dispatcher {
    pub fn new(gateway: Arc<dyn NotificationGateway>, webhooks: Arc<dyn WebhookPublisher>) -> Self {
        Self { gateway, webhooks }
    }

    pub fn logging() -> Self {
        Self::new(Arc::new(LogNotificationGateway), Arc::new(LogWebhookPublisher))
    }

    pub fn notify(&self, notification: Notification) {
        let gateway = self.gateway.clone();
        tokio::spawn(async move {
            if let Err(err) = gateway.send(&notification).await {
                error!(
                    member_id = %notification.member_id,
                    booking_id = %notification.booking_id,
                    error = %err,
                    "Failed to send booking notification"
                );
            }
        });
    }

    pub fn flush(&self, outbox: Outbox) {
        if outbox.is_empty() {
            return;
        }
        for notification in outbox.notifications {
            self.notify(notification);
        }
        for (event, booking_id, tenant_id) in outbox.events {
            self.publish(event, booking_id, tenant_id);
        }
    }

    pub fn publish(&self, event: WebhookEvent, booking_id: BookingId, tenant_id: TenantId) {
        let webhooks = self.webhooks.clone();
        tokio::spawn(async move {
            if let Err(err) = webhooks.publish(event, booking_id, tenant_id).await {
                error!(
                    event = event.as_str(),
                    %booking_id,
                    error = %err,
                    "Failed to publish booking webhook"
                );
            }
        });
    }
}
