//! Turning a reading into what the display shows.

mod band;
pub use band::{Color, SeverityBand, CRITICAL_LOW_MAX, HIGH_MAX, LOW_MAX, NORMAL_MAX};

use crate::dexcom::Reading;
use serde::Serialize;

/// The message published for every reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayPayload {
    /// The glucose value.
    pub text: String,
    /// Display icon identifier, omitted when none is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Color of the reading's band.
    pub color: Color,
}

impl DisplayPayload {
    /// Build the payload for `reading`.
    pub fn new(reading: &Reading, icon: Option<&str>) -> Self {
        Self {
            text: reading.value.to_string(),
            icon: icon.map(ToOwned::to_owned),
            color: SeverityBand::classify(reading.value).color(),
        }
    }

    /// The payload as it goes on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
