//! Hyperparameter declarations, values and grids.

use crate::error::{ModelSelectionError, Result};
use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// Any finite value `>= 0`.
    NonNegative,
    /// A whole number `>= min`.
    Count { min: usize },
}

/// Which end of a parameter's range gives the simpler model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Simpler {
    Smaller,
    Larger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub domain: Domain,
    pub simpler: Simpler,
}

impl ParamSpec {
    pub const fn non_negative(name: &'static str, simpler: Simpler) -> Self {
        Self {
            name,
            domain: Domain::NonNegative,
            simpler,
        }
    }

    pub const fn count(name: &'static str, min: usize, simpler: Simpler) -> Self {
        Self {
            name,
            domain: Domain::Count { min },
            simpler,
        }
    }

    pub fn is_count(&self) -> bool {
        matches!(self.domain, Domain::Count { .. })
    }

    pub fn check(&self, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(ModelSelectionError::invalid_hyperparameter(
                self.name,
                format!("{value} is not finite"),
            ));
        }
        match self.domain {
            Domain::NonNegative if value < 0.0 => Err(ModelSelectionError::invalid_hyperparameter(
                self.name,
                format!("{value} is negative"),
            )),
            Domain::Count { min } if value.fract() != 0.0 || value < min as f64 => {
                Err(ModelSelectionError::invalid_hyperparameter(
                    self.name,
                    format!("{value} is not a whole number >= {min}"),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Orders two values of this parameter; `Less` means `a` is simpler.
    fn simplicity_cmp(&self, a: f64, b: f64) -> Ordering {
        match self.simpler {
            Simpler::Smaller => a.total_cmp(&b),
            Simpler::Larger => b.total_cmp(&a),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Linear,
    /// `min` and `max` are base-10 exponents.
    Log10,
}

/// Candidate values for one parameter, as written in the config file:
/// either an explicit list or an evenly spaced range.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Levels {
    Values(Vec<f64>),
    Range {
        min: f64,
        max: f64,
        levels: usize,
        #[serde(default)]
        scale: Scale,
    },
}

impl Levels {
    pub fn regular(min: f64, max: f64, levels: usize) -> Self {
        Self::Range {
            min,
            max,
            levels,
            scale: Scale::Linear,
        }
    }

    pub fn log10(min: f64, max: f64, levels: usize) -> Self {
        Self::Range {
            min,
            max,
            levels,
            scale: Scale::Log10,
        }
    }

    /// Materialises the candidate values in order, without repeats. Range
    /// levels of whole-number parameters are rounded; explicit values are
    /// kept as written.
    pub fn resolve(&self, integer: bool) -> Vec<f64> {
        let values = match self {
            Levels::Values(values) => values.clone(),
            Levels::Range {
                min,
                max,
                levels,
                scale,
            } => {
                let raw: Vec<f64> = match *levels {
                    0 => Vec::new(),
                    1 => vec![*min],
                    n => (0..n)
                        .map(|i| min + (max - min) * i as f64 / (n - 1) as f64)
                        .collect(),
                };
                let scaled: Vec<f64> = match scale {
                    Scale::Linear => raw,
                    Scale::Log10 => raw.into_iter().map(|e| 10f64.powf(e)).collect(),
                };
                if integer {
                    scaled.into_iter().map(f64::round).collect()
                } else {
                    scaled
                }
            }
        };
        let mut seen = Vec::with_capacity(values.len());
        for value in values {
            if !seen.iter().any(|kept: &f64| kept.total_cmp(&value).is_eq()) {
                seen.push(value);
            }
        }
        seen
    }
}

/// One configuration: parameter values in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Hyperparameters {
    values: Vec<(String, f64)>,
}

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        match self.values.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.values.push((name.to_string(), value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|&(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of `spec`, checked against its domain.
    pub fn value(&self, spec: &ParamSpec) -> Result<f64> {
        let value = self.get(spec.name).ok_or_else(|| {
            ModelSelectionError::invalid_hyperparameter(spec.name, "missing from configuration")
        })?;
        spec.check(value)?;
        Ok(value)
    }

    pub fn count(&self, spec: &ParamSpec) -> Result<usize> {
        Ok(self.value(spec)? as usize)
    }
}

impl fmt::Display for Hyperparameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "(none)");
        }
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

/// A list of configurations together with the declarations they range over.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    specs: Vec<ParamSpec>,
    points: Vec<Hyperparameters>,
}

impl Grid {
    /// The grid of a family without hyperparameters: a single empty point.
    pub fn empty() -> Self {
        Self {
            specs: Vec::new(),
            points: vec![Hyperparameters::new()],
        }
    }

    /// Cross product of the candidate values, last parameter varying fastest.
    pub fn regular(params: Vec<(ParamSpec, Levels)>) -> Result<Self> {
        let mut points = vec![Hyperparameters::new()];
        let mut specs = Vec::with_capacity(params.len());
        for (spec, levels) in params {
            let values = levels.resolve(spec.is_count());
            if values.is_empty() {
                return Err(ModelSelectionError::invalid_hyperparameter(
                    spec.name,
                    "no candidate values",
                ));
            }
            for &value in &values {
                spec.check(value)?;
            }
            points = points
                .into_iter()
                .flat_map(|point| {
                    values
                        .iter()
                        .map(move |&value| point.clone().with(spec.name, value))
                })
                .collect();
            specs.push(spec);
        }
        Ok(Self { specs, points })
    }

    /// An enumerated list of configurations. Every point must name exactly
    /// the declared parameters.
    pub fn explicit(specs: Vec<ParamSpec>, points: Vec<Hyperparameters>) -> Result<Self> {
        if points.is_empty() {
            return Err(ModelSelectionError::InvalidInput(
                "a grid needs at least one point".to_string(),
            ));
        }
        for point in &points {
            if let Some((name, _)) = point.iter().find(|(name, _)| !specs.iter().any(|s| s.name == *name)) {
                return Err(ModelSelectionError::invalid_hyperparameter(
                    name,
                    "not declared by this grid",
                ));
            }
            if let Some(spec) = specs.iter().find(|spec| point.get(spec.name).is_none()) {
                return Err(ModelSelectionError::invalid_hyperparameter(
                    spec.name,
                    format!("missing from grid point [{point}]"),
                ));
            }
        }
        Ok(Self { specs, points })
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn points(&self) -> &[Hyperparameters] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Total order by model simplicity: parameters are compared one after the
    /// other in declaration order, each in its own simpler direction.
    /// `Less` means `a` is the simpler configuration.
    pub fn simplicity_cmp(&self, a: &Hyperparameters, b: &Hyperparameters) -> Ordering {
        for spec in &self.specs {
            let left = a.get(spec.name).unwrap_or(f64::NAN);
            let right = b.get(spec.name).unwrap_or(f64::NAN);
            match spec.simplicity_cmp(left, right) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}
