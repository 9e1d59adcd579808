//! Turns a raw frame into a fully numeric, null-free frame.

use crate::dataset::is_numeric;
use crate::error::{ModelSelectionError, Result};
use polars::prelude::*;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// How a single column becomes numeric predictors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    /// Cast to `f64` as is.
    Numeric,
    /// One 0/1 indicator column per level except the reference level.
    Nominal {
        #[serde(default)]
        reference: Option<String>,
    },
    /// 1-based rank of the value in `levels`.
    Ordinal { levels: Vec<String> },
}

/// Which columns survive and how each is encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ColumnPolicy {
    /// Columns to retain; all columns when absent.
    pub keep: Option<Vec<String>>,
    pub drop: Vec<String>,
    pub encodings: BTreeMap<String, Encoding>,
}

impl ColumnPolicy {
    /// Makes sure `column` is retained, e.g. the target.
    pub fn retaining(mut self, column: &str) -> Self {
        if let Some(keep) = self.keep.as_mut() {
            if !keep.iter().any(|name| name == column) {
                keep.push(column.to_string());
            }
        }
        self.drop.retain(|name| name != column);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    policy: ColumnPolicy,
}

impl Preprocessor {
    pub fn new(policy: ColumnPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ColumnPolicy {
        &self.policy
    }

    /// Applies the policy and returns a new frame: retained columns only, rows
    /// with any missing retained value removed, every column numeric.
    pub fn apply(&self, df: &DataFrame) -> Result<DataFrame> {
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let declared = self
            .policy
            .keep
            .iter()
            .flatten()
            .chain(&self.policy.drop)
            .chain(self.policy.encodings.keys());
        for name in declared {
            if !names.contains(name) {
                return Err(ModelSelectionError::Schema(format!(
                    "column `{name}` not found in {names:?}"
                )));
            }
        }

        let retained: Vec<&String> = names
            .iter()
            .filter(|name| self.policy.keep.as_ref().map_or(true, |keep| keep.contains(name)))
            .filter(|name| !self.policy.drop.contains(name))
            .collect();
        if retained.is_empty() {
            return Err(ModelSelectionError::Schema(
                "column policy retains no columns".to_string(),
            ));
        }

        let selection: Vec<Expr> = retained.iter().map(|name| col(name.as_str())).collect();
        let complete = df.clone().lazy().select(selection).drop_nulls(None).collect()?;
        debug!(
            rows_in = df.height(),
            rows_out = complete.height(),
            columns = retained.len(),
            "Selected columns and dropped incomplete rows"
        );

        let mut columns = Vec::new();
        for name in &retained {
            let column = complete.column(name.as_str())?;
            let encoding = match self.policy.encodings.get(name.as_str()) {
                Some(encoding) => encoding.clone(),
                None if is_numeric(column.dtype()) => Encoding::Numeric,
                None => Encoding::Nominal { reference: None },
            };
            match &encoding {
                Encoding::Numeric => columns.push(numeric(name, column)?),
                Encoding::Nominal { reference } => {
                    columns.extend(indicators(name, column, reference.as_deref())?)
                }
                Encoding::Ordinal { levels } => columns.push(ordinal(name, column, levels)?),
            }
        }
        debug!(n_columns = columns.len(), "Encoded predictors");

        Ok(DataFrame::new(columns)?)
    }
}

fn numeric(name: &str, column: &Column) -> Result<Column> {
    if !is_numeric(column.dtype()) {
        return Err(ModelSelectionError::Schema(format!(
            "column `{name}` of type {} cannot be encoded as numeric",
            column.dtype()
        )));
    }
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(Column::from(series))
}

fn text_values(column: &Column) -> Result<Vec<String>> {
    let series = column.as_materialized_series().cast(&DataType::String)?;
    let values = series
        .str()?
        .into_iter()
        .map(|value| value.unwrap_or_default().to_string())
        .collect();
    Ok(values)
}

fn indicators(name: &str, column: &Column, reference: Option<&str>) -> Result<Vec<Column>> {
    let values = text_values(column)?;
    let levels: BTreeSet<&str> = values.iter().map(String::as_str).collect();
    let reference = match reference {
        Some(level) if !levels.contains(level) => {
            return Err(ModelSelectionError::Schema(format!(
                "reference level `{level}` of column `{name}` is not observed"
            )))
        }
        Some(level) => Some(level),
        None => levels.first().copied(),
    };

    Ok(levels
        .iter()
        .filter(|level| Some(**level) != reference)
        .map(|level| {
            let flags: Vec<f64> = values
                .iter()
                .map(|value| if value == level { 1.0 } else { 0.0 })
                .collect();
            Column::new(format!("{name}_{level}").into(), flags)
        })
        .collect())
}

fn ordinal(name: &str, column: &Column, levels: &[String]) -> Result<Column> {
    let ranks = text_values(column)?
        .iter()
        .map(|value| {
            levels
                .iter()
                .position(|level| level == value)
                .map(|idx| (idx + 1) as f64)
                .ok_or_else(|| {
                    ModelSelectionError::Schema(format!(
                        "value `{value}` of column `{name}` is not in the declared ordering {levels:?}"
                    ))
                })
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok(Column::new(name.into(), ranks))
}
