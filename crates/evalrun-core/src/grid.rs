//! Grid-search parameter expansion.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Parameter name → candidate values, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridParams(Vec<(String, Vec<String>)>);

impl GridParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter and its candidates.
    pub fn param<K, I, V>(mut self, name: K, candidates: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.0
            .push((name.into(), candidates.into_iter().map(Into::into).collect()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of combinations the grid expands to.
    pub fn combination_count(&self) -> usize {
        self.0.iter().map(|(_, values)| values.len()).product()
    }

    /// Reject empty candidate lists and repeated parameter names.
    pub fn validate(&self) -> EngineResult<()> {
        let mut names = HashSet::new();
        for (name, values) in &self.0 {
            if !names.insert(name.as_str()) {
                return Err(EngineError::Validation(format!(
                    "grid parameter {name} is defined more than once"
                )));
            }
            if values.is_empty() {
                return Err(EngineError::Validation(format!(
                    "grid parameter {name} has no candidate values"
                )));
            }
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, Vec<V>)> for GridParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Vec<V>)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(GridParams::new(), |grid, (k, v)| grid.param(k, v))
    }
}

/// One concrete assignment of a value to every grid parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCombo(Vec<(String, String)>);

impl GridCombo {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value assigned to `name`, if it is a grid parameter.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Map form sent as `gridSearchParamsCombo`.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0.iter().cloned().collect()
    }
}

/// Cartesian product of the grid, first parameter varying slowest.
///
/// An empty grid yields exactly one empty combination.
pub fn expand(params: &GridParams) -> Vec<GridCombo> {
    let mut combos = vec![GridCombo::default()];
    for (name, values) in &params.0 {
        combos = combos
            .iter()
            .flat_map(|combo| {
                values.iter().map(move |value| {
                    let mut next = combo.0.clone();
                    next.push((name.clone(), value.clone()));
                    GridCombo(next)
                })
            })
            .collect();
    }
    combos
}
