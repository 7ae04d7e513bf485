use serde::{Deserialize, Serialize};

/// Number of documents a Free account may create per usage window.
pub const FREE_TIER_LIMIT: u32 = 10;

/// Length of the trailing usage window, in days.
pub const USAGE_WINDOW_DAYS: i64 = 30;

/// Subscription tier of an account.
///
/// Stored tiers outside the known set (empty string, legacy plan names,
/// corrupt data) decode as [`Tier::Free`]. Entitlement checks therefore fail
/// closed instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl Tier {
    /// Decode a stored tier value. Unknown values are `Free`.
    pub fn from_stored(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }
}

impl From<String> for Tier {
    fn from(value: String) -> Self {
        Tier::from_stored(&value)
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
