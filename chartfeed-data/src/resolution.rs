use serde::{Deserialize, Serialize};

/// Chart bar resolution (bucket width), expressed as the code the charting
/// widget passes around (`"1"`, `"5"`, ..., `"1D"`).
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Deserialize, Serialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    #[default]
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Resolution {
    /// Every resolution the feeds advertise via their capabilities.
    pub const ALL: [Resolution; 7] = [
        Resolution::M1,
        Resolution::M5,
        Resolution::M15,
        Resolution::M30,
        Resolution::H1,
        Resolution::H4,
        Resolution::D1,
    ];

    /// Parse a resolution code. Unknown codes default to the 1-minute resolution.
    pub fn from_code(code: &str) -> Self {
        match code {
            "1" => Resolution::M1,
            "5" => Resolution::M5,
            "15" => Resolution::M15,
            "30" => Resolution::M30,
            "60" => Resolution::H1,
            "240" => Resolution::H4,
            "1D" | "D" => Resolution::D1,
            _ => Resolution::M1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::M1 => "1",
            Resolution::M5 => "5",
            Resolution::M15 => "15",
            Resolution::M30 => "30",
            Resolution::H1 => "60",
            Resolution::H4 => "240",
            Resolution::D1 => "1D",
        }
    }

    /// Bucket width in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Resolution::M1 => 60,
            Resolution::M5 => 5 * 60,
            Resolution::M15 => 15 * 60,
            Resolution::M30 => 30 * 60,
            Resolution::H1 => 60 * 60,
            Resolution::H4 => 240 * 60,
            Resolution::D1 => 86_400,
        }
    }

    /// Floor a unix timestamp (seconds) to the start of its resolution bucket.
    pub fn align(&self, unix_secs: i64) -> i64 {
        let width = self.seconds();
        (unix_secs / width) * width
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for Resolution {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Resolution::from_code(&value))
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.as_str().to_string()
    }
}
