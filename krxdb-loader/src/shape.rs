//! Long-to-wide reshaping.
//!
//! Query results pivot from `(TRD_DD, ISU_SRT_CD, value)` long form to a
//! frame indexed by date with one column per symbol. Dates ascend down the
//! rows, symbols ascend across the columns, and combinations with no
//! observation are null. The cell dtype follows the source column.

use std::collections::HashMap;

use polars::prelude::*;

use krxdb_core::date::PARTITION_KEY;
use krxdb_core::error::{KdbError, Result};
use krxdb_core::snapshot::COL_SYMBOL;

/// Pivot a long frame to wide (dates × symbols) on `value_col`.
pub fn pivot_wide(long: &DataFrame, value_col: &str) -> Result<DataFrame> {
    if long.height() == 0 {
        return DataFrame::new(vec![Column::new(PARTITION_KEY.into(), Vec::<String>::new())])
            .map_err(|e| KdbError::Payload(format!("empty pivot: {e}")));
    }

    let dates_col = long
        .column(PARTITION_KEY)
        .and_then(|c| c.str())
        .map_err(|e| KdbError::Payload(format!("pivot date column: {e}")))?;
    let syms_col = long
        .column(COL_SYMBOL)
        .and_then(|c| c.str())
        .map_err(|e| KdbError::Payload(format!("pivot symbol column: {e}")))?;

    let mut dates: Vec<&str> = dates_col.iter().flatten().collect();
    dates.sort_unstable();
    dates.dedup();
    let mut symbols: Vec<&str> = syms_col.iter().flatten().collect();
    symbols.sort_unstable();
    symbols.dedup();

    let date_index: HashMap<&str, usize> =
        dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
    let symbol_index: HashMap<&str, usize> =
        symbols.iter().enumerate().map(|(i, s)| (*s, i)).collect();

    // (row → grid slot); rows with a null key carry no information
    let slots: Vec<Option<(usize, usize)>> = dates_col
        .iter()
        .zip(syms_col.iter())
        .map(|(date, sym)| match (date, sym) {
            (Some(date), Some(sym)) => Some((date_index[date], symbol_index[sym])),
            _ => None,
        })
        .collect();

    let values = long
        .column(value_col)
        .map_err(|e| KdbError::Payload(format!("pivot value column: {e}")))?;

    let mut columns = vec![Column::new(
        PARTITION_KEY.into(),
        dates.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
    )];

    match values.dtype() {
        DataType::Int64 => {
            let vals: Vec<Option<i64>> = values.i64().unwrap().iter().collect();
            columns.extend(assemble(dates.len(), &symbols, &slots, vals));
        }
        DataType::Int32 => {
            let vals: Vec<Option<i32>> = values.i32().unwrap().iter().collect();
            columns.extend(assemble(dates.len(), &symbols, &slots, vals));
        }
        DataType::Float64 => {
            let vals: Vec<Option<f64>> = values.f64().unwrap().iter().collect();
            columns.extend(assemble(dates.len(), &symbols, &slots, vals));
        }
        DataType::Boolean => {
            let vals: Vec<Option<bool>> = values.bool().unwrap().iter().collect();
            columns.extend(assemble(dates.len(), &symbols, &slots, vals));
        }
        DataType::String => {
            let vals: Vec<Option<String>> = values
                .str()
                .unwrap()
                .iter()
                .map(|v| v.map(str::to_string))
                .collect();
            columns.extend(assemble(dates.len(), &symbols, &slots, vals));
        }
        other => {
            return Err(KdbError::Payload(format!(
                "cannot pivot column '{value_col}' of type {other}"
            )))
        }
    }

    DataFrame::new(columns).map_err(|e| KdbError::Payload(format!("pivot frame: {e}")))
}

fn assemble<T: Clone>(
    n_dates: usize,
    symbols: &[&str],
    slots: &[Option<(usize, usize)>],
    vals: Vec<Option<T>>,
) -> Vec<Column>
where
    Series: NamedFrom<Vec<Option<T>>, [Option<T>]>,
{
    let mut grid: Vec<Vec<Option<T>>> = vec![vec![None; n_dates]; symbols.len()];
    for (slot, val) in slots.iter().zip(vals) {
        if let Some((date_i, sym_i)) = slot {
            grid[*sym_i][*date_i] = val;
        }
    }
    symbols
        .iter()
        .zip(grid)
        .map(|(sym, cells)| {
            <Series as NamedFrom<Vec<Option<T>>, [Option<T>]>>::new((*sym).into(), cells)
                .into_column()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_frame() -> DataFrame {
        DataFrame::new(vec![
            Column::new(
                PARTITION_KEY.into(),
                vec!["20240102", "20240102", "20240103"],
            ),
            Column::new(COL_SYMBOL.into(), vec!["005930", "000660", "005930"]),
            Column::new("TDD_CLSPRC".into(), vec![100i64, 200, 110]),
        ])
        .unwrap()
    }

    #[test]
    fn pivots_with_nulls_for_missing_cells() {
        let wide = pivot_wide(&long_frame(), "TDD_CLSPRC").unwrap();

        assert_eq!(wide.height(), 2);
        assert_eq!(
            wide.get_column_names()
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
            vec![PARTITION_KEY, "000660", "005930"]
        );

        let hynix = wide.column("000660").unwrap();
        let hynix = hynix.i64().unwrap();
        assert_eq!(hynix.get(0), Some(200));
        assert_eq!(hynix.get(1), None); // absent on 20240103

        let samsung = wide.column("005930").unwrap();
        let samsung = samsung.i64().unwrap();
        assert_eq!(samsung.get(0), Some(100));
        assert_eq!(samsung.get(1), Some(110));
    }

    #[test]
    fn dates_ascend_down_the_index() {
        let df = DataFrame::new(vec![
            Column::new(PARTITION_KEY.into(), vec!["20240105", "20240102"]),
            Column::new(COL_SYMBOL.into(), vec!["A", "A"]),
            Column::new("V".into(), vec![2i64, 1]),
        ])
        .unwrap();

        let wide = pivot_wide(&df, "V").unwrap();
        let dates = wide.column(PARTITION_KEY).unwrap();
        let dates = dates.str().unwrap();
        assert_eq!(dates.get(0), Some("20240102"));
        assert_eq!(dates.get(1), Some("20240105"));
    }

    #[test]
    fn preserves_float_dtype() {
        let df = DataFrame::new(vec![
            Column::new(PARTITION_KEY.into(), vec!["20240102"]),
            Column::new(COL_SYMBOL.into(), vec!["A"]),
            Column::new("ADJ_FACTOR".into(), vec![0.02f64]),
        ])
        .unwrap();

        let wide = pivot_wide(&df, "ADJ_FACTOR").unwrap();
        assert_eq!(wide.column("A").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn empty_long_gives_empty_index() {
        let df = DataFrame::new(vec![
            Column::new(PARTITION_KEY.into(), Vec::<String>::new()),
            Column::new(COL_SYMBOL.into(), Vec::<String>::new()),
            Column::new("V".into(), Vec::<i64>::new()),
        ])
        .unwrap();

        let wide = pivot_wide(&df, "V").unwrap();
        assert_eq!(wide.height(), 0);
        assert_eq!(wide.width(), 1);
    }
}
