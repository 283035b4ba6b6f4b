//! What to do with a feed decision

use serde::{Deserialize, Serialize};
use std::fmt;

use pricefeed_core::{FeedDecision, FeedFlag};

/// Operator preferences for risky publications
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Ask before publishing a change over the warning threshold
    pub confirm_warning: bool,
    /// Drop changes over the skip threshold instead of asking
    pub skip_critical: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishVerdict {
    Publish,
    /// Price barely moved but the feed is about to expire
    Republish,
    ConfirmWarning,
    ConfirmCritical,
    SkipUnchanged,
    SkipCritical,
    SkipInactiveWitness,
}

impl PublishVerdict {
    pub fn name(&self) -> &'static str {
        match self {
            PublishVerdict::Publish => "publish",
            PublishVerdict::Republish => "republish",
            PublishVerdict::ConfirmWarning => "confirm_warning",
            PublishVerdict::ConfirmCritical => "confirm_critical",
            PublishVerdict::SkipUnchanged => "skip_unchanged",
            PublishVerdict::SkipCritical => "skip_critical",
            PublishVerdict::SkipInactiveWitness => "skip_inactive_witness",
        }
    }

    pub fn is_publish(&self) -> bool {
        matches!(self, PublishVerdict::Publish | PublishVerdict::Republish)
    }

    pub fn needs_confirmation(&self) -> bool {
        matches!(
            self,
            PublishVerdict::ConfirmWarning | PublishVerdict::ConfirmCritical
        )
    }
}

impl fmt::Display for PublishVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Classify a decision; the first matching rule wins
pub fn plan(decision: &FeedDecision, options: &PublishOptions) -> PublishVerdict {
    let min_change = decision.has_flag(FeedFlag::MinChange);
    let over_max_age = decision.has_flag(FeedFlag::OverMaxAge);

    if decision.has_flag(FeedFlag::SkipInactiveWitness) {
        PublishVerdict::SkipInactiveWitness
    } else if !min_change && !over_max_age {
        PublishVerdict::SkipUnchanged
    } else if decision.has_flag(FeedFlag::SkipChange) {
        if options.skip_critical {
            PublishVerdict::SkipCritical
        } else {
            PublishVerdict::ConfirmCritical
        }
    } else if decision.has_flag(FeedFlag::OverWarnChange) && options.confirm_warning {
        PublishVerdict::ConfirmWarning
    } else if over_max_age && !min_change {
        PublishVerdict::Republish
    } else {
        PublishVerdict::Publish
    }
}
