use chrono::{DateTime, Utc};

use crate::api::v1alpha1::{PatternCondition, PatternConditionType};

pub const CONDITION_TRUE: &str = "True";

/// Next value of the git sync condition given the previous one and a comparison result.
///
/// LastUpdateTime is always `now`. LastTransitionTime moves to `now` only when the
/// condition flips, or when there was no previous condition.
pub fn next_condition(
    prev: Option<&PatternCondition>,
    in_sync: bool,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> PatternCondition {
    let type_ = if in_sync {
        PatternConditionType::GitInSync
    } else {
        PatternConditionType::GitOutOfSync
    };

    let last_transition_time = match prev {
        Some(prev) if prev.type_ == type_ && prev.status == CONDITION_TRUE => prev.last_transition_time,
        _ => Some(now),
    };

    PatternCondition {
        type_,
        status: CONDITION_TRUE.to_string(),
        last_update_time: now,
        last_transition_time,
        message: message.into(),
    }
}

/// Records a comparison result in `conditions` and returns the new conditions
/// together with whether the type or message changed.
///
/// Both condition types describe the same comparison, so a single entry is kept.
/// Duplicates left behind by older writers collapse into the first one.
pub fn set_sync_condition(
    conditions: &[PatternCondition],
    in_sync: bool,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> (Vec<PatternCondition>, bool) {
    let prev = conditions.first();
    let next = next_condition(prev, in_sync, message, now);
    let changed = prev.map_or(true, |p| {
        p.type_ != next.type_ || p.status != next.status || p.message != next.message
    });

    (vec![next], changed)
}
