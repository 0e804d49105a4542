//! Reinforcement-tag aggregation: grade → quota table, then Hamilton
//! (largest-remainder) apportionment into integer `reinforcement_seats`.

use std::collections::HashMap;

use crate::substrate::trace_parser::ReinforcementTag;

pub const MAX_SEATS: i64 = 32;

/// Maps a trace grade string to its signed quota contribution. Unknown
/// grades contribute zero rather than erroring — a malformed grade
/// shouldn't abort the whole reinforcement pass.
pub fn grade_quota(grade: &str) -> f64 {
    match grade.trim().to_lowercase().as_str() {
        "very useful" => 4.0,
        "useful" => 2.0,
        "somewhat useful" => 1.0,
        "not useful" => -1.0,
        "misleading" => -2.0,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReinforcementResult {
    pub seats: HashMap<String, i64>,
    pub seats_total: i64,
    pub raw_quotas: HashMap<String, f64>,
}

pub struct ReinforcementAggregator;

impl ReinforcementAggregator {
    /// Aggregate all reinforcement tags for one trace into per-node
    /// integer seats.
    ///
    /// `seats_total = clamp(round(Σ|quota|), 0, MAX_SEATS)`. Each node's
    /// exact share is `quota / Σ|quota|` of that total, apportioned by
    /// Hamilton's method (floor the exact shares, then hand out the
    /// remaining seats to the largest fractional remainders, breaking
    /// ties lexicographically by node id for determinism).
    pub fn aggregate(tags: &[ReinforcementTag]) -> ReinforcementResult {
        let mut raw_quotas: HashMap<String, f64> = HashMap::new();
        for tag in tags {
            *raw_quotas.entry(tag.node_id.clone()).or_insert(0.0) += grade_quota(&tag.grade);
        }

        let abs_sum: f64 = raw_quotas.values().map(|q| q.abs()).sum();
        if abs_sum <= 0.0 {
            return ReinforcementResult { seats: HashMap::new(), seats_total: 0, raw_quotas };
        }

        let seats_total = ((abs_sum.round() as i64).clamp(0, MAX_SEATS)).max(0);
        if seats_total == 0 {
            return ReinforcementResult { seats: HashMap::new(), seats_total: 0, raw_quotas };
        }

        let mut ids: Vec<&String> = raw_quotas.keys().collect();
        ids.sort();

        let mut exact_shares: Vec<(String, f64)> = ids
            .iter()
            .map(|id| {
                let share = raw_quotas[*id].abs() / abs_sum * seats_total as f64;
                ((*id).clone(), share)
            })
            .collect();

        let mut seats: HashMap<String, i64> = HashMap::new();
        let mut allocated = 0i64;
        let mut remainders: Vec<(String, f64)> = Vec::new();
        for (id, share) in exact_shares.drain(..) {
            let floor = share.floor();
            seats.insert(id.clone(), floor as i64);
            allocated += floor as i64;
            remainders.push((id, share - floor));
        }

        remainders.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));

        let mut remaining = seats_total - allocated;
        for (id, _) in remainders {
            if remaining <= 0 {
                break;
            }
            *seats.entry(id).or_insert(0) += 1;
            remaining -= 1;
        }

        // Re-apply sign: a node with a negative net quota gets negative seats.
        for (id, quota) in &raw_quotas {
            if *quota < 0.0 {
                if let Some(s) = seats.get_mut(id) {
                    *s = -*s;
                }
            }
        }

        ReinforcementResult { seats, seats_total, raw_quotas }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(id: &str, grade: &str) -> ReinforcementTag {
        ReinforcementTag { node_id: id.into(), grade: grade.into() }
    }

    #[test]
    fn grade_quota_table_matches_spec() {
        assert_eq!(grade_quota("very useful"), 4.0);
        assert_eq!(grade_quota("useful"), 2.0);
        assert_eq!(grade_quota("somewhat useful"), 1.0);
        assert_eq!(grade_quota("not useful"), -1.0);
        assert_eq!(grade_quota("misleading"), -2.0);
        assert_eq!(grade_quota("unknown grade"), 0.0);
    }

    #[test]
    fn seats_total_sums_absolute_quotas_and_clamps() {
        let tags = vec![tag("a", "very useful"), tag("b", "useful")];
        let result = ReinforcementAggregator::aggregate(&tags);
        assert_eq!(result.seats_total, 6);
    }

    #[test]
    fn seats_are_apportioned_proportionally() {
        let tags = vec![tag("a", "very useful"), tag("a", "very useful"), tag("b", "useful")];
        // a: quota 8, b: quota 2, abs_sum = 10, seats_total = 10.
        let result = ReinforcementAggregator::aggregate(&tags);
        assert_eq!(result.seats_total, 10);
        assert_eq!(result.seats.get("a"), Some(&8));
        assert_eq!(result.seats.get("b"), Some(&2));
    }

    #[test]
    fn negative_grades_yield_negative_seats() {
        let tags = vec![tag("a", "misleading"), tag("a", "misleading")];
        let result = ReinforcementAggregator::aggregate(&tags);
        assert!(result.seats.get("a").copied().unwrap_or(0) < 0);
    }

    #[test]
    fn empty_tags_yield_no_seats() {
        let result = ReinforcementAggregator::aggregate(&[]);
        assert_eq!(result.seats_total, 0);
        assert!(result.seats.is_empty());
    }

    #[test]
    fn seats_total_never_exceeds_max_seats() {
        let tags: Vec<ReinforcementTag> = (0..20).map(|i| tag(&format!("n{i}"), "very useful")).collect();
        let result = ReinforcementAggregator::aggregate(&tags);
        assert_eq!(result.seats_total, MAX_SEATS);
    }
}
