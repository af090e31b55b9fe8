use serde::{Deserialize, Serialize};

/// Per-year margin-call risk across all iterations, on the 0-100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginCallProbability {
    pub year: u32,
    /// Share of iterations with a liquidation in exactly this year.
    pub probability: f64,
    /// Share of iterations with a liquidation in this year or earlier.
    /// Monotonically non-decreasing in the year.
    pub cumulative_probability: f64,
}

/// Convert per-iteration liquidation years into per-year probabilities.
///
/// `liquidation_years[i]` lists the years in which iteration `i` was
/// force-liquidated (at most one entry per year). Rows cover years
/// `0..=time_horizon`; year 0 only fires for a portfolio that starts over
/// its max LTV.
pub fn aggregate_margin_call_events(
    liquidation_years: &[Vec<u32>],
    time_horizon: u32,
) -> Vec<MarginCallProbability> {
    let n = liquidation_years.len();
    if n == 0 {
        return Vec::new();
    }

    let horizon = time_horizon as usize;
    let mut in_year = vec![0usize; horizon + 1];
    let mut first_year: Vec<Option<u32>> = Vec::with_capacity(n);
    for years in liquidation_years {
        for &y in years {
            if (y as usize) <= horizon {
                in_year[y as usize] += 1;
            }
        }
        first_year.push(years.iter().copied().min());
    }

    let mut stats = Vec::with_capacity(horizon + 1);
    for year in 0..=horizon {
        let cumulative_hits = first_year
            .iter()
            .filter(|f| f.map(|fy| fy as usize <= year).unwrap_or(false))
            .count();
        stats.push(MarginCallProbability {
            year: year as u32,
            probability: 100.0 * in_year[year] as f64 / n as f64,
            cumulative_probability: 100.0 * cumulative_hits as f64 / n as f64,
        });
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probabilities_counted_per_year() {
        // 4 iterations: one liquidates in year 2, one in years 2 and 5
        let events = vec![vec![], vec![2], vec![2, 5], vec![]];
        let stats = aggregate_margin_call_events(&events, 5);
        assert_eq!(stats.len(), 6);
        assert_eq!(stats[2].probability, 50.0);
        assert_eq!(stats[5].probability, 25.0);
        assert_eq!(stats[1].probability, 0.0);
    }

    #[test]
    fn test_cumulative_counts_first_hit_only() {
        let events = vec![vec![], vec![2], vec![2, 5], vec![]];
        let stats = aggregate_margin_call_events(&events, 5);
        // Both liquidating iterations first hit in year 2
        assert_eq!(stats[1].cumulative_probability, 0.0);
        assert_eq!(stats[2].cumulative_probability, 50.0);
        assert_eq!(stats[5].cumulative_probability, 50.0);
    }

    #[test]
    fn test_cumulative_is_monotone_and_bounded() {
        let events = vec![vec![1], vec![3], vec![4], vec![], vec![2], vec![2]];
        let stats = aggregate_margin_call_events(&events, 6);
        let mut last = 0.0;
        for row in &stats {
            assert!(row.cumulative_probability >= last);
            assert!((0.0..=100.0).contains(&row.cumulative_probability));
            last = row.cumulative_probability;
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(aggregate_margin_call_events(&[], 10).is_empty());
    }
}
