use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::model::Appointment;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Confirmation,
    Change,
    Cancellation,
    Reminder,
}

impl NoticeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeKind::Confirmation => "confirmation",
            NoticeKind::Change => "change",
            NoticeKind::Cancellation => "cancellation",
            NoticeKind::Reminder => "reminder",
        }
    }

    /// Mail subject line.
    pub fn subject(&self) -> &'static str {
        match self {
            NoticeKind::Confirmation => "【予約確認】 ご予約が完了しました",
            NoticeKind::Change => "【予約変更】 ご予約内容が変更されました！",
            NoticeKind::Cancellation => "【予約キャンセル】 ご予約がキャンセルされました！",
            NoticeKind::Reminder => "【リマインダー】 明日のご予約について",
        }
    }
}

/// What a delivery collaborator needs: who to tell, and about what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub recipient: Option<String>,
    pub appointment: Appointment,
}

impl Notice {
    /// Only bookings owned by an account are addressed; walk-ins get no
    /// recipient.
    pub fn new(kind: NoticeKind, appointment: &Appointment) -> Self {
        Self {
            kind,
            recipient: appointment
                .owner_id
                .and_then(|_| appointment.customer_email.clone()),
            appointment: appointment.clone(),
        }
    }
}

/// Broadcast hub for appointment notices.
pub struct NotifyHub {
    sender: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// Publish a notice. No-op if nobody is listening; never fails the caller.
    pub fn send(&self, notice: Notice) {
        let kind = notice.kind.as_str();
        match self.sender.send(notice) {
            Ok(_) => {
                metrics::counter!(crate::observability::NOTICES_PUBLISHED_TOTAL, "kind" => kind)
                    .increment(1);
            }
            Err(_) => tracing::debug!("no notice subscribers, dropped {kind} notice"),
        }
    }
}

#[derive(Debug, Error)]
#[error("notice delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Something that delivers notices (mail, SMS, webhook...).
#[async_trait]
pub trait NoticeSink: Send + Sync {
    async fn deliver(&self, notice: &Notice) -> Result<(), DeliveryError>;
}

/// Writes notices to the log instead of delivering them.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NoticeSink for LogSink {
    async fn deliver(&self, notice: &Notice) -> Result<(), DeliveryError> {
        tracing::info!(
            appointment = %notice.appointment.id,
            recipient = notice.recipient.as_deref().unwrap_or("-"),
            "{}",
            notice.kind.subject()
        );
        Ok(())
    }
}

/// Drain notices into `sink` until the hub is dropped. Delivery failures are
/// logged and counted, never retried.
pub async fn run_dispatcher(mut rx: broadcast::Receiver<Notice>, sink: Arc<dyn NoticeSink>) {
    loop {
        let notice = match rx.recv().await {
            Ok(notice) => notice,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("notice dispatcher lagged, skipped {skipped} notices");
                metrics::counter!(crate::observability::NOTICES_FAILED_TOTAL).increment(skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if notice.recipient.is_none() {
            tracing::debug!("no recipient for {} notice on {}", notice.kind.as_str(), notice.appointment.id);
            continue;
        }
        if let Err(e) = sink.deliver(&notice).await {
            tracing::warn!("{e} ({} for {})", notice.kind.as_str(), notice.appointment.id);
            metrics::counter!(crate::observability::NOTICES_FAILED_TOTAL).increment(1);
        }
    }
}
