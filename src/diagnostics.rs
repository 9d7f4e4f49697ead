use std::collections::BTreeMap;

use polars::prelude::*;
use tracing::debug;

use crate::error::{BenthosError, Result};

/// Row bookkeeping for a single transform step.
///
/// Filtering transforms record how many rows they intend to remove and why;
/// `finish` verifies that the output height matches exactly. Any unexplained
/// difference means a join or groupby silently dropped or duplicated records,
/// which is fatal.
#[derive(Debug)]
pub struct RowLedger {
    step: &'static str,
    rows_in: usize,
    removed: BTreeMap<&'static str, usize>,
}

impl RowLedger {
    pub fn start(step: &'static str, input: &DataFrame) -> Self {
        Self {
            step,
            rows_in: input.height(),
            removed: BTreeMap::new(),
        }
    }

    /// Record rows removed on purpose, keyed by reason.
    pub fn record(&mut self, reason: &'static str, rows: usize) {
        *self.removed.entry(reason).or_insert(0) += rows;
    }

    /// Verify that rows_in - recorded removals == rows_out. The delta is
    /// signed: added rows never pass as explained removals.
    pub fn finish(self, output: &DataFrame) -> Result<()> {
        let expected: i64 = self.removed.values().map(|&r| r as i64).sum();
        let rows_out = output.height();
        let actual = self.rows_in as i64 - rows_out as i64;
        if actual != expected {
            return Err(BenthosError::Conservation(format!(
                "{}: rows in {}, rows out {}, removed {} (expected {})",
                self.step, self.rows_in, rows_out, actual, expected
            )));
        }
        debug!(step = self.step, rows_in = self.rows_in, rows_out, "row count verified");
        Ok(())
    }
}

/// Fatal check that the sum of a numeric column survived a transform within
/// the rounding tolerance of one unit.
pub fn verify_sum_conserved(
    step: &'static str,
    input: &DataFrame,
    output: &DataFrame,
    column: &str,
) -> Result<()> {
    let sum_in = column_sum(input, column)?;
    let sum_out = column_sum(output, column)?;
    let diff = sum_out - sum_in;
    if diff.abs() >= 1.0 {
        return Err(BenthosError::Conservation(format!(
            "{step}: sum of '{column}' changed from {sum_in} to {sum_out} (difference {diff})"
        )));
    }
    Ok(())
}

fn column_sum(df: &DataFrame, column: &str) -> Result<f64> {
    let casted = df.column(column)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.sum().unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_accepts_explained_removals() {
        let df = df!("a" => [1, 2, 3, 4]).unwrap();
        let out = df!("a" => [1, 2]).unwrap();
        let mut ledger = RowLedger::start("filter", &df);
        ledger.record("dropped", 2);
        assert!(ledger.finish(&out).is_ok());
    }

    #[test]
    fn ledger_rejects_duplicated_rows_even_with_recorded_removals() {
        // a join that duplicates as many rows as a filter removed must
        // still fail, the delta has the wrong sign
        let df = df!("a" => [1, 2, 3, 4]).unwrap();
        let out = df!("a" => [1, 2, 3, 4, 5, 6]).unwrap();
        let mut ledger = RowLedger::start("join", &df);
        ledger.record("dropped", 2);
        let err = ledger.finish(&out).unwrap_err();
        assert!(matches!(err, BenthosError::Conservation(_)));
    }

    #[test]
    fn ledger_rejects_unexplained_difference() {
        let df = df!("a" => [1, 2, 3]).unwrap();
        let out = df!("a" => [1]).unwrap();
        let ledger = RowLedger::start("filter", &df);
        let err = ledger.finish(&out).unwrap_err();
        assert!(matches!(err, BenthosError::Conservation(_)));
    }

    #[test]
    fn sum_conservation_tolerates_rounding() {
        let a = df!("v" => [1.0, 2.0, 3.0]).unwrap();
        let b = df!("v" => [1.0, 2.0, 3.5]).unwrap();
        assert!(verify_sum_conserved("step", &a, &b, "v").is_ok());

        let c = df!("v" => [1.0, 2.0, 5.0]).unwrap();
        assert!(verify_sum_conserved("step", &a, &c, "v").is_err());
    }
}
