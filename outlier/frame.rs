//! # Indexed Frames
//!
//! Every view of the aggregation core is a polars `DataFrame` paired with the
//! ordered list of *index* columns that identify one entity of the view (for
//! example `gene_name, sample, tissue` for the gene view). polars has no row
//! index of its own, so `IndexedFrame` carries the names alongside the frame
//! and checks them on construction.
//!
//! The free functions below are the frame operations the views are built
//! from. They all go through the lazy engine and share one convention: row
//! order is the order of first occurrence in the input, which is restored
//! from a temporary row-index column wherever polars does not guarantee it.

use crate::error::{OutlierError, Result};
use itertools::Itertools;
use polars::prelude::*;

const ROW_INDEX: &str = "__row";
const FIRST_ROW: &str = "__first_row";
const CHOSEN_ROW: &str = "__chosen_row";
const RANK: &str = "__rank";
const GROUP_SIZE: &str = "__group_size";

/// A frame together with the columns that identify its rows.
#[derive(Debug, Clone)]
pub struct IndexedFrame {
    frame: DataFrame,
    index: Vec<String>,
}

impl PartialEq for IndexedFrame {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.frame.equals_missing(&other.frame)
    }
}

impl IndexedFrame {
    /// Pairs `frame` with `index`. Every index column must exist.
    pub fn new<S: AsRef<str>>(frame: DataFrame, index: &[S]) -> Result<Self> {
        require_columns(&frame, index)?;
        Ok(Self {
            frame,
            index: index.iter().map(|s| s.as_ref().to_string()).collect(),
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn has_column(&self, name: &str) -> bool {
        has_column(&self.frame, name)
    }

    pub fn column_names(&self) -> Vec<String> {
        column_names(&self.frame)
    }

    /// Numeric cell, with non-numeric columns cast to `Float64`.
    pub fn float_at(&self, row: usize, name: &str) -> Result<Option<f64>> {
        Ok(floats(&self.frame, name)?.get(row))
    }

    /// Text cell, with non-text columns cast to `String`.
    pub fn str_at(&self, row: usize, name: &str) -> Result<Option<String>> {
        Ok(strings(&self.frame, name)?.get(row).map(str::to_string))
    }

    /// First row whose index columns equal `key`.
    pub fn find_by_index(&self, key: &[&str]) -> Option<usize> {
        if key.len() != self.index.len() {
            return None;
        }
        let columns: Vec<StringChunked> = self
            .index
            .iter()
            .map(|name| strings(&self.frame, name))
            .collect::<Result<_>>()
            .ok()?;
        (0..self.height()).find(|&row| {
            columns
                .iter()
                .zip(key)
                .all(|(column, k)| column.get(row) == Some(*k))
        })
    }
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .collect()
}

pub fn require_columns<S: AsRef<str>>(df: &DataFrame, names: &[S]) -> Result<()> {
    match names.iter().find(|n| !has_column(df, n.as_ref())) {
        Some(missing) => Err(OutlierError::Schema(format!(
            "column '{}' not found",
            missing.as_ref()
        ))),
        None => Ok(()),
    }
}

/// The named column as text.
pub fn strings(df: &DataFrame, name: &str) -> Result<StringChunked> {
    let column = df
        .column(name)
        .map_err(|_| OutlierError::Schema(format!("column '{name}' not found")))?;
    Ok(column.cast(&DataType::String)?.str()?.clone())
}

/// The named column as `Float64`; values that do not parse become missing.
pub fn floats(df: &DataFrame, name: &str) -> Result<Float64Chunked> {
    let column = df
        .column(name)
        .map_err(|_| OutlierError::Schema(format!("column '{name}' not found")))?;
    Ok(column.cast(&DataType::Float64)?.f64()?.clone())
}

/// The named column as nullable values, `NaN` read as missing.
pub fn float_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    Ok(floats(df, name)?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec(
        ROW_INDEX.into(),
        rows.iter().map(|&r| r as IdxSize).collect(),
    );
    Ok(df.take(&idx)?)
}

pub fn filter_rows(df: &DataFrame, mask: &[bool]) -> Result<DataFrame> {
    let mask = BooleanChunked::from_slice("mask".into(), mask);
    Ok(df.filter(&mask)?)
}

/// Moves the named columns to the front, keeping the relative order of the rest.
pub fn reorder_front<S: AsRef<str>>(df: &DataFrame, front: &[S]) -> Result<DataFrame> {
    let front: Vec<String> = front.iter().map(|s| s.as_ref().to_string()).collect();
    let rest = column_names(df).into_iter().filter(|n| !front.contains(n));
    let ordered: Vec<String> = front.iter().cloned().chain(rest).collect();
    Ok(df.select(ordered)?)
}

fn key_exprs<S: AsRef<str>>(key: &[S]) -> Vec<Expr> {
    key.iter().map(|k| col(k.as_ref())).collect()
}

/// `key` values of one row, joined with `|`.
pub fn row_key<S: AsRef<str>>(df: &DataFrame, key: &[S], row: usize) -> Result<String> {
    let parts = key
        .iter()
        .map(|k| Ok(strings(df, k.as_ref())?.get(row).unwrap_or("null").to_string()))
        .collect::<Result<Vec<String>>>()?;
    Ok(parts.join("|"))
}

/// Rows of every distinct `key`, groups in order of first occurrence.
pub fn group_rows<S: AsRef<str>>(df: &DataFrame, key: &[S]) -> Result<Vec<Vec<usize>>> {
    require_columns(df, key)?;
    let grouped = df
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .group_by_stable(key_exprs(key))
        .agg([col(ROW_INDEX)])
        .collect()?;
    let mut groups = Vec::with_capacity(grouped.height());
    for rows in grouped.column(ROW_INDEX)?.list()?.into_iter().flatten() {
        groups.push(
            rows.idx()?
                .into_no_null_iter()
                .map(|r| r as usize)
                .collect(),
        );
    }
    Ok(groups)
}

/// Keeps one whole row per distinct `key`. With `rank_by`, the row with the
/// largest absolute value of that column is kept; missing values rank lowest
/// and the first occurrence wins ties. Without it the first row is kept.
/// Groups come out in order of first occurrence.
pub fn representative_rows<S: AsRef<str>>(
    df: &DataFrame,
    key: &[S],
    rank_by: Option<&str>,
) -> Result<DataFrame> {
    require_columns(df, key)?;
    let indexed = df.clone().lazy().with_row_index(ROW_INDEX, None);
    let ordered = match rank_by {
        Some(column) => {
            require_columns(df, &[column])?;
            let value = col(column).cast(DataType::Float64);
            indexed
                .with_column(
                    when(value.clone().lt(lit(0.0)))
                        .then(lit(0.0) - value.clone())
                        .otherwise(value)
                        .alias(RANK),
                )
                .sort_by_exprs(
                    vec![col(RANK), col(ROW_INDEX)],
                    SortMultipleOptions::default()
                        .with_order_descending_multi([true, false])
                        .with_nulls_last(true)
                        .with_maintain_order(true),
                )
        }
        None => indexed,
    };
    let chosen = ordered
        .group_by(key_exprs(key))
        .agg([
            col(ROW_INDEX).first().alias(CHOSEN_ROW),
            col(ROW_INDEX).min().alias(FIRST_ROW),
        ])
        .sort_by_exprs(vec![col(FIRST_ROW)], SortMultipleOptions::default())
        .collect()?;
    Ok(df.take(chosen.column(CHOSEN_ROW)?.idx()?)?)
}

/// First `key` that occurs on more than one row.
pub fn duplicated_key<S: AsRef<str>>(df: &DataFrame, key: &[S]) -> Result<Option<String>> {
    require_columns(df, key)?;
    let duplicated = df
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .group_by(key_exprs(key))
        .agg([col(ROW_INDEX).min().alias(FIRST_ROW), len().alias(GROUP_SIZE)])
        .filter(col(GROUP_SIZE).gt(lit(1)))
        .sort_by_exprs(vec![col(FIRST_ROW)], SortMultipleOptions::default())
        .collect()?;
    if duplicated.height() == 0 {
        return Ok(None);
    }
    Ok(Some(row_key(&duplicated, key, 0)?))
}

/// Left join on `on`, keeping the row order of `left`. Missing key parts never
/// match. Right columns whose names collide with left columns get `suffix`.
pub fn left_join<S: AsRef<str>>(
    left: &DataFrame,
    right: &DataFrame,
    on: &[S],
    suffix: &str,
) -> Result<DataFrame> {
    ordered_join(left, right, on, suffix, JoinType::Left)
}

/// Inner join on `on`, keeping the row order of `left`.
pub fn inner_join<S: AsRef<str>>(
    left: &DataFrame,
    right: &DataFrame,
    on: &[S],
    suffix: &str,
) -> Result<DataFrame> {
    ordered_join(left, right, on, suffix, JoinType::Inner)
}

fn ordered_join<S: AsRef<str>>(
    left: &DataFrame,
    right: &DataFrame,
    on: &[S],
    suffix: &str,
    how: JoinType,
) -> Result<DataFrame> {
    require_columns(left, on)?;
    require_columns(right, on)?;
    let joined = left
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .join(
            right.clone().lazy(),
            key_exprs(on),
            key_exprs(on),
            JoinArgs::new(how).with_suffix(Some(suffix.into())),
        )
        .sort_by_exprs(
            vec![col(ROW_INDEX)],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?;
    Ok(joined.drop(ROW_INDEX)?)
}

/// Stacks frames vertically; all parts must share one schema.
pub fn vstack_all(parts: Vec<DataFrame>) -> Result<DataFrame> {
    let mut iter = parts.into_iter();
    let mut out = iter
        .next()
        .ok_or_else(|| OutlierError::InsufficientData("no frames to stack".to_string()))?;
    for part in iter {
        if part.schema() != out.schema() {
            return Err(OutlierError::Schema(format!(
                "cannot stack frames with different schemas: [{}] vs [{}]",
                column_names(&out).iter().join(", "),
                column_names(&part).iter().join(", ")
            )));
        }
        out.vstack_mut(&part)?;
    }
    out.align_chunks();
    Ok(out)
}
