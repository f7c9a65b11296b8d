//! Cross-sectional liquidity ranking.
//!
//! Dense rank over traded value, descending: rank 1 is the most liquid
//! symbol of the day, ties share a rank, ranks have no gaps. Symbols with
//! zero traded value (trading halts) participate and land on the worst
//! rank(s).

use polars::prelude::*;

use crate::error::{KdbError, Result};
use crate::snapshot::COL_LIQUIDITY_RANK;

/// Dense-rank a day's traded values into a `LIQUIDITY_RANK` column (Int32).
///
/// Null traded values are treated as zero so halted symbols still rank.
pub fn liquidity_ranks(traded_value: &Column) -> Result<Column> {
    let series = traded_value
        .as_materialized_series()
        .fill_null(FillNullStrategy::Zero)
        .map_err(|e| KdbError::Payload(format!("traded value fill: {e}")))?;

    let ranked = series.rank(
        RankOptions {
            method: RankMethod::Dense,
            descending: true,
        },
        None,
    );

    let ranked = ranked
        .cast(&DataType::Int32)
        .map_err(|e| KdbError::Payload(format!("rank cast: {e}")))?
        .with_name(COL_LIQUIDITY_RANK.into());

    Ok(ranked.into_column())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranks_of(values: &[i64]) -> Vec<i32> {
        let col = Column::new("ACC_TRDVAL".into(), values.to_vec());
        let ranked = liquidity_ranks(&col).unwrap();
        let ranked = ranked.i32().unwrap();
        (0..values.len()).map(|i| ranked.get(i).unwrap()).collect()
    }

    #[test]
    fn highest_value_ranks_first() {
        assert_eq!(ranks_of(&[100, 300, 200]), vec![3, 1, 2]);
    }

    #[test]
    fn ties_share_a_rank_without_gaps() {
        // Two symbols tied at 300 both get rank 1; next distinct value is 2
        assert_eq!(ranks_of(&[300, 300, 100, 200]), vec![1, 1, 3, 2]);
    }

    #[test]
    fn rank_multiset_is_dense_one_to_m() {
        let values = [500, 400, 400, 300, 300, 300, 100, 0];
        let mut ranks = ranks_of(&values);
        ranks.sort_unstable();
        ranks.dedup();
        // M distinct traded values → ranks exactly {1..=M}
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn zero_value_gets_worst_rank() {
        let ranks = ranks_of(&[1_000_000, 500_000, 0]);
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn null_values_rank_as_zero() {
        let col = Column::new("ACC_TRDVAL".into(), vec![Some(100i64), None, Some(200)]);
        let ranked = liquidity_ranks(&col).unwrap();
        let ranked = ranked.i32().unwrap();
        assert_eq!(ranked.get(0), Some(2));
        assert_eq!(ranked.get(1), Some(3));
        assert_eq!(ranked.get(2), Some(1));
    }

    #[test]
    fn single_symbol_ranks_one() {
        assert_eq!(ranks_of(&[42]), vec![1]);
    }
}
