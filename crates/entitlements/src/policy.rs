//! Tier policy: (tier, recent usage, action) -> decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tierguard_core::DomainResult;

use crate::tier::{Tier, FREE_TIER_LIMIT, USAGE_WINDOW_DAYS};
use crate::usage::UsageWindow;

/// Document action a caller wants to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Usage-metered for Free accounts.
    Create,
    /// Pro-only.
    Edit,
    /// Pro-only.
    Delete,
    /// Unrestricted.
    Download,
    /// Unrestricted.
    View,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Download => "download",
            Action::View => "view",
        }
    }
}

/// Machine-readable reason for a policy denial.
///
/// Callers map these to an upgrade prompt; the serialized form matches the
/// error codes returned by the document endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    /// Free-tier quota for the current window is used up.
    LimitReached,
    /// The action needs a Pro subscription.
    TierRestricted,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::LimitReached => "LIMIT_REACHED",
            DenialReason::TierRestricted => "TIER_RESTRICTED",
        }
    }
}

/// Outcome of an authorization check. Denials are values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    /// Deny without a policy reason: the decision could not be evaluated.
    pub fn fail_closed() -> Self {
        Self {
            allowed: false,
            reason: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Quota parameters. Defaults are the product constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePolicy {
    pub free_tier_limit: u32,
    pub window_days: i64,
}

impl Default for UsagePolicy {
    fn default() -> Self {
        Self {
            free_tier_limit: FREE_TIER_LIMIT,
            window_days: USAGE_WINDOW_DAYS,
        }
    }
}

impl UsagePolicy {
    pub fn window_at(&self, now: DateTime<Utc>) -> DomainResult<UsageWindow> {
        UsageWindow::trailing(now, self.window_days)
    }

    /// Whether deciding `action` for `tier` needs the recent usage count.
    ///
    /// Lets callers skip the ledger query for everything but Free creations.
    pub fn needs_usage(&self, tier: Tier, action: Action) -> bool {
        tier == Tier::Free && action == Action::Create
    }

    /// Decide whether `action` may proceed.
    ///
    /// `recent_count` is only consulted when [`needs_usage`](Self::needs_usage)
    /// is true.
    pub fn decide(&self, tier: Tier, action: Action, recent_count: u32) -> Decision {
        match (tier, action) {
            (_, Action::Download | Action::View) => Decision::allow(),
            (Tier::Pro, _) => Decision::allow(),
            (Tier::Free, Action::Create) => {
                if recent_count < self.free_tier_limit {
                    Decision::allow()
                } else {
                    Decision::deny(DenialReason::LimitReached)
                }
            }
            (Tier::Free, Action::Edit | Action::Delete) => {
                Decision::deny(DenialReason::TierRestricted)
            }
        }
    }

    pub fn snapshot(
        &self,
        tier: Tier,
        used: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<QuotaSnapshot> {
        let window = self.window_at(now)?;
        Ok(match tier {
            Tier::Pro => QuotaSnapshot {
                tier,
                used,
                limit: None,
                remaining: None,
                window_start: window.start,
            },
            Tier::Free => QuotaSnapshot {
                tier,
                used,
                limit: Some(self.free_tier_limit),
                remaining: Some(self.free_tier_limit.saturating_sub(used)),
                window_start: window.start,
            },
        })
    }
}

/// Usage summary for display (settings page, dashboard banner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub tier: Tier,
    pub used: u32,
    /// `None` means unlimited.
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub window_start: DateTime<Utc>,
}
