use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::command::CommandRecord;

/// Pending records of one command type, as reported by a store summary.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LeaseSummary {
    /// Routing key the row is grouped by.
    pub command_type: String,
    /// Number of records still in storage.
    pub count: i64,
    /// Highest lease count among them.
    pub max_try_count: i32,
}

/// Computes the lease deadline granted at `now`.
///
/// Durations too large for chrono saturate to the maximum representable
/// timestamp instead of failing the prefetch.
pub fn lease_deadline(now: DateTime<Utc>, lease: StdDuration) -> DateTime<Utc> {
    Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Groups records by command type, ordered by type name.
pub fn summarize<'a>(
    records: impl IntoIterator<Item = &'a CommandRecord>,
) -> Vec<LeaseSummary> {
    let mut groups: BTreeMap<&str, (i64, i32)> = BTreeMap::new();
    for record in records {
        let entry = groups.entry(record.command_type.as_str()).or_insert((0, 0));
        entry.0 += 1;
        entry.1 = entry.1.max(record.try_count);
    }

    groups
        .into_iter()
        .map(|(command_type, (count, max_try_count))| LeaseSummary {
            command_type: command_type.to_string(),
            count,
            max_try_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_deadline_adds_duration() {
        let now = Utc::now();
        let deadline = lease_deadline(now, StdDuration::from_secs(60));
        assert_eq!(deadline - now, Duration::seconds(60));
    }

    #[test]
    fn test_lease_deadline_saturates() {
        let now = Utc::now();
        let deadline = lease_deadline(now, StdDuration::from_secs(u64::MAX));
        assert_eq!(deadline, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_summarize_groups_by_type() {
        let now = Utc::now();
        let mut a1 = CommandRecord::new("a", "{}", now);
        a1.try_count = 2;
        let a2 = CommandRecord::new("a", "{}", now);
        let mut b = CommandRecord::new("b", "{}", now);
        b.try_count = 5;

        let summary = summarize([&b, &a1, &a2]);
        assert_eq!(
            summary,
            vec![
                LeaseSummary {
                    command_type: "a".into(),
                    count: 2,
                    max_try_count: 2,
                },
                LeaseSummary {
                    command_type: "b".into(),
                    count: 1,
                    max_try_count: 5,
                },
            ]
        );
    }

    #[test]
    fn test_summarize_empty() {
        assert!(summarize(std::iter::empty()).is_empty());
    }
}
