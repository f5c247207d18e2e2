use crate::models::{
    ComparisonReport, ItemOutcome, Metric, MetricComparison, VariantResult, VariantRun, Winner,
};
use crate::scoring::{mean, round_to};

/// Averages are reported with this many decimals
const AVERAGE_PRECISION: usize = 3;

/// Mean of each metric over a variant's items, zeros for no items
pub fn aggregate(items: &[ItemOutcome]) -> VariantResult {
    let overlap: Vec<f64> = items.iter().map(|item| item.keyword_overlap).collect();
    let length: Vec<f64> = items.iter().map(|item| item.response_length).collect();

    VariantResult {
        avg_keyword_overlap: round_to(mean(&overlap), AVERAGE_PRECISION),
        avg_response_length: round_to(mean(&length), AVERAGE_PRECISION),
        n_items: items.len(),
    }
}

/// Strict comparison: only a strictly greater value wins.
///
/// Averages that differ by rounding noise still produce a winner.
pub fn winner(value_a: f64, value_b: f64) -> Winner {
    if value_a > value_b {
        Winner::A
    } else if value_b > value_a {
        Winner::B
    } else {
        Winner::Tie
    }
}

/// Compare two variants on each metric, keeping the order of `metrics`
pub fn compare(a: &VariantRun, b: &VariantRun, metrics: &[Metric]) -> ComparisonReport {
    let rows = metrics
        .iter()
        .map(|metric| {
            let value_a = metric.value(&a.result);
            let value_b = metric.value(&b.result);
            MetricComparison {
                metric: *metric,
                value_a,
                value_b,
                winner: winner(value_a, value_b),
            }
        })
        .collect();

    ComparisonReport {
        variant_a: a.label.clone(),
        variant_b: b.label.clone(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(label: &str, overlap: f64, length: f64, n_items: usize) -> VariantRun {
        VariantRun {
            label: label.to_string(),
            result: VariantResult {
                avg_keyword_overlap: overlap,
                avg_response_length: length,
                n_items,
            },
            items: vec![],
        }
    }

    fn outcome(keyword_overlap: f64, response_length: f64) -> ItemOutcome {
        ItemOutcome {
            question: None,
            keyword_overlap,
            response_length,
        }
    }

    #[test]
    fn test_aggregate_empty() {
        let result = aggregate(&[]);
        assert_eq!(
            result,
            VariantResult {
                avg_keyword_overlap: 0.0,
                avg_response_length: 0.0,
                n_items: 0,
            }
        );
    }

    #[test]
    fn test_aggregate_rounds_to_three_decimals() {
        let result = aggregate(&[outcome(1.0, 0.5), outcome(0.0, 1.0), outcome(0.0, 1.0)]);
        assert_eq!(result.avg_keyword_overlap, 0.333);
        assert_eq!(result.avg_response_length, 0.833);
        assert_eq!(result.n_items, 3);
    }

    #[test]
    fn test_aggregate_rounds_stored_mean_not_scaled_mean() {
        let items: Vec<ItemOutcome> = [0.69, 0.7, 0.29, 0.51]
            .iter()
            .map(|&overlap| outcome(overlap, 1.0))
            .collect();
        let result = aggregate(&items);
        assert_eq!(result.avg_keyword_overlap, 0.547);
        assert_eq!(winner(result.avg_keyword_overlap, 0.5475), Winner::B);
    }

    #[test]
    fn test_winner_rule() {
        assert_eq!(winner(0.8, 0.5), Winner::A);
        assert_eq!(winner(0.2, 0.9), Winner::B);
        assert_eq!(winner(0.5, 0.5), Winner::Tie);
        assert_eq!(winner(0.0, 0.0), Winner::Tie);
        // no tolerance: a difference of 0.001 still decides
        assert_eq!(winner(0.667, 0.666), Winner::A);
    }

    #[test]
    fn test_compare_follows_metric_order() {
        let a = run("a", 0.75, 0.9, 8);
        let b = run("b", 0.6, 1.0, 8);

        let report = compare(&a, &b, &Metric::ALL);
        assert_eq!(report.variant_a, "a");
        assert_eq!(report.variant_b, "b");
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].metric, Metric::AvgKeywordOverlap);
        assert_eq!(report.rows[0].winner, Winner::A);
        assert_eq!(report.rows[1].metric, Metric::AvgResponseLength);
        assert_eq!(report.rows[1].winner, Winner::B);

        let reversed = compare(&a, &b, &[Metric::AvgResponseLength, Metric::AvgKeywordOverlap]);
        assert_eq!(reversed.rows[0].metric, Metric::AvgResponseLength);
        assert_eq!(reversed.rows[0].value_a, 0.9);
        assert_eq!(reversed.rows[0].value_b, 1.0);
    }

    #[test]
    fn test_compare_identical_results_tie() {
        let a = run("a", 0.5, 0.75, 4);
        let b = run("b", 0.5, 0.75, 4);

        let report = compare(&a, &b, &Metric::ALL);
        assert!(report.rows.iter().all(|row| row.winner == Winner::Tie));
    }
}
