use serde::Serialize;

/// Upper bound (inclusive) of [`SeverityBand::CriticalLow`].
pub const CRITICAL_LOW_MAX: i64 = 55;
/// Upper bound (inclusive) of [`SeverityBand::Low`].
pub const LOW_MAX: i64 = 79;
/// Upper bound (inclusive) of [`SeverityBand::Normal`].
pub const NORMAL_MAX: i64 = 120;
/// Upper bound (inclusive) of [`SeverityBand::High`]. Anything above is
/// [`SeverityBand::CriticalHigh`].
pub const HIGH_MAX: i64 = 159;

/// Classification of a glucose value, ordered from lowest to highest.
///
/// The bands tile the whole `i64` range. Values at or below zero are not
/// physiological, they fall into [`SeverityBand::CriticalLow`] with the other
/// low values rather than being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityBand {
    /// ≤ 55
    CriticalLow,
    /// 56 to 79
    Low,
    /// 80 to 120
    Normal,
    /// 121 to 159
    High,
    /// ≥ 160
    CriticalHigh,
}

impl SeverityBand {
    /// The band `value` falls into.
    pub const fn classify(value: i64) -> Self {
        match value {
            i64::MIN..=CRITICAL_LOW_MAX => Self::CriticalLow,
            56..=LOW_MAX => Self::Low,
            80..=NORMAL_MAX => Self::Normal,
            121..=HIGH_MAX => Self::High,
            _ => Self::CriticalHigh,
        }
    }

    /// Display color of the band.
    pub const fn color(self) -> Color {
        match self {
            Self::CriticalLow | Self::CriticalHigh => Color::Red,
            Self::Low | Self::High => Color::Orange,
            Self::Normal => Color::Green,
        }
    }
}

/// Colors used on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    /// `#FF0000`
    Red,
    /// `#FFA500`
    Orange,
    /// `#008000`
    Green,
}

impl Color {
    /// Hex notation, as the display expects it.
    pub const fn hex(self) -> &'static str {
        match self {
            Self::Red => "#FF0000",
            Self::Orange => "#FFA500",
            Self::Green => "#008000",
        }
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.hex())
    }
}
