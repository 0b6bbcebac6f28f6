use thiserror::Error;
use ulid::Ulid;

use crate::time::BusinessHours;

/// A broken booking rule. Messages are shown to customers as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("開始時間を入力してください")]
    MissingStart,
    #[error("終了時間を入力してください")]
    MissingEnd,
    #[error("お名前を入力してください")]
    MissingCustomerName,
    #[error("営業時間外です（{hours}）")]
    OutsideBusinessHours { hours: BusinessHours },
    #[error("予約は{minutes}分刻みでお願いします（例: 9:10-10:10）")]
    Misaligned { minutes: u32 },
    #[error("終了時間は開始時間より後である必要があります")]
    EndNotAfterStart,
    #[error("予約は最低{}以上必要です", japanese_duration(.min_minutes))]
    TooShort { min_minutes: u32 },
    #[error("予約は最大{}までです", japanese_duration(.max_minutes))]
    TooLong { max_minutes: u32 },
    #[error("この時間帯は既に{limit}組の予約で満員です")]
    CapacityReached { limit: u32 },
}

impl ValidationError {
    /// Short rule name for metrics labels.
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::MissingStart
            | ValidationError::MissingEnd
            | ValidationError::MissingCustomerName => "presence",
            ValidationError::OutsideBusinessHours { .. } => "business_hours",
            ValidationError::Misaligned { .. } => "granularity",
            ValidationError::EndNotAfterStart => "ordering",
            ValidationError::TooShort { .. } | ValidationError::TooLong { .. } => "duration",
            ValidationError::CapacityReached { .. } => "capacity",
        }
    }
}

/// `60` → `1時間`, `90` → `1時間30分`, `45` → `45分`.
fn japanese_duration(minutes: &u32) -> String {
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}分"),
        (h, 0) => format!("{h}時間"),
        (h, m) => format!("{h}時間{m}分"),
    }
}

/// Malformed input caught at the boundary, before the engine runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid date: {0:?}")]
    InvalidDate(String),
    #[error("invalid time: {0:?}")]
    InvalidTime(String),
    #[error("invalid slot duration: {0} minutes")]
    InvalidDuration(u32),
    #[error("invalid UTC offset: {0} minutes")]
    InvalidOffset(i32),
    #[error("invalid business hours: open {open} / close {close} (minutes after midnight)")]
    InvalidBusinessHours { open: u32, close: u32 },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("not permitted on appointment {0}")]
    Forbidden(Ulid),
    #[error("admin role required")]
    AdminOnly,
    #[error("{}", join_messages(.0))]
    Invalid(Vec<ValidationError>),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// The rule violations, when this is a validation failure.
    pub fn violations(&self) -> &[ValidationError] {
        match self {
            EngineError::Invalid(errors) => errors,
            _ => &[],
        }
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
