//! Splitting the server's concurrency limit across priority levels.

use std::collections::BTreeMap;

use crate::types::{PriorityLevelConfiguration, PriorityLevelEnablement};

/// Computes the assured concurrency value of every `Limited` level:
/// `ceil(server_limit * shares / total_shares)`. Exempt levels are not
/// limited and get no entry.
pub fn assured_concurrency_limits(
    server_limit: u32,
    levels: &[PriorityLevelConfiguration],
) -> BTreeMap<String, u32> {
    let limited: Vec<(&str, u64)> = levels
        .iter()
        .filter(|pl| pl.spec.type_ == PriorityLevelEnablement::Limited)
        .filter_map(|pl| {
            pl.spec
                .limited
                .as_ref()
                .map(|l| (pl.name(), l.assured_concurrency_shares.max(0) as u64))
        })
        .collect();

    let total: u64 = limited.iter().map(|(_, shares)| shares).sum();
    if total == 0 {
        return limited.into_iter().map(|(name, _)| (name.to_string(), 0)).collect();
    }

    limited
        .into_iter()
        .map(|(name, shares)| {
            let numerator = server_limit as u64 * shares;
            let limit = (numerator + total - 1) / total;
            (name.to_string(), limit as u32)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bootstrap::{mandatory_priority_levels, suggested_priority_levels};

    #[test]
    fn shares_are_split_proportionally() {
        let mut levels = mandatory_priority_levels();
        levels.extend(suggested_priority_levels());

        let limits = assured_concurrency_limits(600, &levels);
        assert!(!limits.contains_key("exempt"));
        // 5 + 30 + 10 + 40 + 100 + 20 = 205 shares in total.
        assert_eq!(limits["catch-all"], 15);
        assert_eq!(limits["system"], 88);
        assert_eq!(limits["leader-election"], 30);
        assert_eq!(limits["workload-high"], 118);
        assert_eq!(limits["workload-low"], 293);
        assert_eq!(limits["global-default"], 59);
    }

    #[test]
    fn no_shares() {
        let levels = vec![PriorityLevelConfiguration::exempt("exempt")];
        assert!(assured_concurrency_limits(100, &levels).is_empty());
    }
}
