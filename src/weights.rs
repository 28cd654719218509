//! Per-category backend weight multipliers

use crate::error::WeightTableError;
use std::collections::BTreeMap;

/// Category byte -> one multiplier per backend.
///
/// Every row has the same number of columns, one per backend, and every
/// multiplier is finite and non-negative so projected loads never drop
/// below the current load.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    rows: BTreeMap<u8, Vec<f64>>,
    backends: usize,
}

impl WeightTable {
    /// Build a table from `(category, row)` pairs.
    ///
    /// The column count of the first row fixes the backend count.
    pub fn new<I>(rows: I) -> Result<Self, WeightTableError>
    where
        I: IntoIterator<Item = (u8, Vec<f64>)>,
    {
        let rows: BTreeMap<u8, Vec<f64>> = rows.into_iter().collect();

        let Some(first) = rows.values().next() else {
            return Err(WeightTableError::Empty);
        };
        let backends = first.len();
        if backends == 0 {
            return Err(WeightTableError::NoBackends);
        }

        for (&category, row) in &rows {
            if !category.is_ascii() || category.is_ascii_control() {
                return Err(WeightTableError::InvalidCategory(
                    char::from(category).to_string(),
                ));
            }
            if row.len() != backends {
                return Err(WeightTableError::RaggedRow {
                    category: char::from(category),
                    expected: backends,
                    found: row.len(),
                });
            }
            if let Some((backend, &value)) = row
                .iter()
                .enumerate()
                .find(|(_, w)| !w.is_finite() || **w < 0.0)
            {
                return Err(WeightTableError::InvalidWeight {
                    category: char::from(category),
                    backend,
                    value,
                });
            }
        }

        Ok(Self { rows, backends })
    }

    /// Build a table from the string-keyed form used in config files
    pub fn from_named<'a, I>(rows: I) -> Result<Self, WeightTableError>
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<f64>)>,
    {
        let mut parsed = Vec::new();
        for (name, row) in rows {
            let category = match name.as_bytes() {
                [byte] if byte.is_ascii() => *byte,
                _ => return Err(WeightTableError::InvalidCategory(name.clone())),
            };
            parsed.push((category, row.clone()));
        }
        Self::new(parsed)
    }

    /// Multipliers for a category, one per backend
    pub fn row(&self, category: u8) -> Option<&[f64]> {
        self.rows.get(&category).map(Vec::as_slice)
    }

    pub fn contains(&self, category: u8) -> bool {
        self.rows.contains_key(&category)
    }

    /// Number of backend columns
    pub fn backend_count(&self) -> usize {
        self.backends
    }

    /// Known categories in ascending byte order
    pub fn categories(&self) -> impl Iterator<Item = char> + '_ {
        self.rows.keys().map(|&c| char::from(c))
    }
}

impl Default for WeightTable {
    /// The three-backend table the balancer ships with
    fn default() -> Self {
        Self {
            rows: default_rows()
                .into_iter()
                .map(|(name, row)| (name.as_bytes()[0], row))
                .collect(),
            backends: 3,
        }
    }
}

/// Default rows in config-file form
pub(crate) fn default_rows() -> BTreeMap<String, Vec<f64>> {
    BTreeMap::from([
        ("M".to_string(), vec![2.0, 2.0, 1.0]),
        ("V".to_string(), vec![1.0, 1.0, 3.0]),
        ("P".to_string(), vec![1.0, 1.0, 2.0]),
    ])
}
