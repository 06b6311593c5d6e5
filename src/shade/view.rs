use nimbus_client::{ShadePosition, ShadeStatus, StatusPath};
use serde::Serialize;

/// Notifications pushed to whatever renders the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    /// A full snapshot was received.
    Status { status: ShadeStatus },
    AutomaticMode { enabled: bool },
    ManualShade { minutes: u32 },
    RainStatus { raining: bool, label: String },
    ShadeStatus { position: ShadePosition, label: String },
    Countdown { seconds_left: u64, display: String },
    /// Result of a single field write.
    Updated { field: StatusPath, success: bool },
    Notice { message: String },
    Error { message: String },
}

impl ViewEvent {
    pub fn notice(message: impl Into<String>) -> Self {
        ViewEvent::Notice {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ViewEvent::Error {
            message: message.into(),
        }
    }

    pub fn shade(position: ShadePosition) -> Self {
        ViewEvent::ShadeStatus {
            position,
            label: position.label().to_string(),
        }
    }

    pub fn rain(raining: bool) -> Self {
        ViewEvent::RainStatus {
            raining,
            label: nimbus_client::rain_status_label(raining).to_string(),
        }
    }
}
