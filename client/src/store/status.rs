use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::client::StatusStoreError;

/// Accepted range for the manual shade duration, in minutes.
pub const MANUAL_SHADE_RANGE: RangeInclusive<u32> = 1..=120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountdownModel {
    pub seconds_left: u64,
}

/// The single shared record kept by the status store.
///
/// Missing fields take the defaults the record is created with, so a partially
/// written record still decodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShadeStatus {
    pub automatic_mode: bool,
    pub manual_shade: u32,
    pub rain_status: bool,
    pub shade_status: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_model: Option<CountdownModel>,
    pub extend_button: bool,
}

impl Default for ShadeStatus {
    fn default() -> Self {
        ShadeStatus {
            automatic_mode: true,
            manual_shade: 30,
            rain_status: true,
            shade_status: true,
            countdown_model: None,
            extend_button: false,
        }
    }
}

impl ShadeStatus {
    /// Decodes a whole-record snapshot. An absent or empty record is `NotFound`.
    pub fn from_snapshot(value: &Value) -> Result<Self, StatusStoreError> {
        match value {
            Value::Null => Err(StatusStoreError::NotFound),
            Value::Object(map) if map.is_empty() => Err(StatusStoreError::NotFound),
            _ => serde_json::from_value(value.clone())
                .map_err(|e| StatusStoreError::Malformed(e.to_string())),
        }
    }

    pub fn seconds_left(&self) -> Option<u64> {
        self.countdown_model.map(|c| c.seconds_left)
    }

    pub fn position(&self, polarity: ShadePolarity) -> ShadePosition {
        polarity.decode(self.shade_status)
    }

    pub fn rain_label(&self) -> &'static str {
        rain_status_label(self.rain_status)
    }
}

pub fn rain_status_label(raining: bool) -> &'static str {
    if raining { "Raining" } else { "Not Detected" }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadePosition {
    Extended,
    Retracted,
}

impl ShadePosition {
    pub fn label(&self) -> &'static str {
        match self {
            ShadePosition::Extended => "Extended",
            ShadePosition::Retracted => "Retracted",
        }
    }
}

impl Display for ShadePosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Meaning of `shadeStatus == true`. Older app revisions stored the opposite
/// convention, so both are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadePolarity {
    #[default]
    RetractedIsTrue,
    ExtendedIsTrue,
}

impl ShadePolarity {
    pub fn decode(&self, raw: bool) -> ShadePosition {
        match (self, raw) {
            (ShadePolarity::RetractedIsTrue, true) | (ShadePolarity::ExtendedIsTrue, false) => {
                ShadePosition::Retracted
            }
            _ => ShadePosition::Extended,
        }
    }

    pub fn encode(&self, position: ShadePosition) -> bool {
        match self {
            ShadePolarity::RetractedIsTrue => position == ShadePosition::Retracted,
            ShadePolarity::ExtendedIsTrue => position == ShadePosition::Extended,
        }
    }
}

/// Addressable locations inside the status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPath {
    Root,
    AutomaticMode,
    ManualShade,
    RainStatus,
    ShadeStatus,
    ExtendButton,
    CountdownModel,
    CountdownSecondsLeft,
}

impl StatusPath {
    pub const ALL: [StatusPath; 8] = [
        StatusPath::Root,
        StatusPath::AutomaticMode,
        StatusPath::ManualShade,
        StatusPath::RainStatus,
        StatusPath::ShadeStatus,
        StatusPath::ExtendButton,
        StatusPath::CountdownModel,
        StatusPath::CountdownSecondsLeft,
    ];

    pub fn segments(&self) -> &'static [&'static str] {
        match self {
            StatusPath::Root => &[],
            StatusPath::AutomaticMode => &["automaticMode"],
            StatusPath::ManualShade => &["manualShade"],
            StatusPath::RainStatus => &["rainStatus"],
            StatusPath::ShadeStatus => &["shadeStatus"],
            StatusPath::ExtendButton => &["extendButton"],
            StatusPath::CountdownModel => &["countdownModel"],
            StatusPath::CountdownSecondsLeft => &["countdownModel", "secondsLeft"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusPath::Root => "",
            StatusPath::AutomaticMode => "automaticMode",
            StatusPath::ManualShade => "manualShade",
            StatusPath::RainStatus => "rainStatus",
            StatusPath::ShadeStatus => "shadeStatus",
            StatusPath::ExtendButton => "extendButton",
            StatusPath::CountdownModel => "countdownModel",
            StatusPath::CountdownSecondsLeft => "countdownModel/secondsLeft",
        }
    }
}

impl Display for StatusPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusPath::Root => f.write_str("/"),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl FromStr for StatusPath {
    type Err = StatusStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_matches('/').replace('.', "/");
        StatusPath::ALL
            .into_iter()
            .find(|path| path.as_str() == trimmed)
            .ok_or_else(|| StatusStoreError::InvalidPath(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_full_record() {
        let json = r#"{
            "automaticMode": false,
            "manualShade": 45,
            "rainStatus": false,
            "shadeStatus": false,
            "countdownModel": {"secondsLeft": 570},
            "extendButton": true
        }"#;
        let value: Value = serde_json::from_str(json).unwrap();
        let status = ShadeStatus::from_snapshot(&value).unwrap();
        assert!(!status.automatic_mode);
        assert_eq!(status.manual_shade, 45);
        assert_eq!(status.seconds_left(), Some(570));
        assert!(status.extend_button);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let value = serde_json::json!({"automaticMode": false});
        let status = ShadeStatus::from_snapshot(&value).unwrap();
        assert!(!status.automatic_mode);
        assert_eq!(status.manual_shade, 30);
        assert_eq!(status.countdown_model, None);
    }

    #[test]
    fn empty_record_is_not_found() {
        assert_eq!(
            ShadeStatus::from_snapshot(&Value::Null),
            Err(StatusStoreError::NotFound)
        );
        assert_eq!(
            ShadeStatus::from_snapshot(&serde_json::json!({})),
            Err(StatusStoreError::NotFound)
        );
    }

    #[test]
    fn wrong_types_are_malformed() {
        let value = serde_json::json!({"manualShade": "thirty"});
        assert!(matches!(
            ShadeStatus::from_snapshot(&value),
            Err(StatusStoreError::Malformed(_))
        ));
    }

    #[test]
    fn countdown_is_omitted_when_absent() {
        let value = serde_json::to_value(ShadeStatus::default()).unwrap();
        assert!(value.get("countdownModel").is_none());
        assert_eq!(value["manualShade"], 30);
    }

    #[test]
    fn polarity_round_trips_positions() {
        for polarity in [ShadePolarity::RetractedIsTrue, ShadePolarity::ExtendedIsTrue] {
            for position in [ShadePosition::Extended, ShadePosition::Retracted] {
                assert_eq!(polarity.decode(polarity.encode(position)), position);
            }
        }
        assert_eq!(
            ShadePolarity::RetractedIsTrue.decode(true),
            ShadePosition::Retracted
        );
        assert_eq!(
            ShadePolarity::ExtendedIsTrue.decode(true),
            ShadePosition::Extended
        );
    }

    #[test]
    fn labels() {
        assert_eq!(rain_status_label(true), "Raining");
        assert_eq!(rain_status_label(false), "Not Detected");
        assert_eq!(ShadePosition::Retracted.label(), "Retracted");
    }

    #[test]
    fn parse_paths() {
        assert_eq!("/".parse::<StatusPath>().unwrap(), StatusPath::Root);
        assert_eq!(
            "countdownModel.secondsLeft".parse::<StatusPath>().unwrap(),
            StatusPath::CountdownSecondsLeft
        );
        assert_eq!(
            "/manualShade".parse::<StatusPath>().unwrap(),
            StatusPath::ManualShade
        );
        assert!("weather".parse::<StatusPath>().is_err());
    }
}
