//! Cost tables and their construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CostTableError, Result};

/// Latencies in seconds, indexed by `[in_channels - 1, out_channels - 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    rows: usize,
    cols: usize,
    /// Row-major.
    data: Vec<f64>,
}

impl CostTable {
    /// Max input channels.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Max output channels.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Latency of the layer with `in_channels` inputs and `out_channels` outputs.
    pub fn get(&self, in_channels: usize, out_channels: usize) -> Option<f64> {
        if in_channels == 0 || out_channels == 0 || in_channels > self.rows || out_channels > self.cols {
            return None;
        }
        Some(self.data[(in_channels - 1) * self.cols + out_channels - 1])
    }

    pub fn row(&self, in_channels: usize) -> Option<&[f64]> {
        if in_channels == 0 || in_channels > self.rows {
            return None;
        }
        let start = (in_channels - 1) * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    /// Iterates over `(in_channels, out_channels, seconds)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.data
            .iter()
            .enumerate()
            .map(|(i, v)| (i / self.cols + 1, i % self.cols + 1, *v))
    }
}

/// A cost table being filled in; every cell must be set exactly once before
/// [`TableBuilder::finish`] succeeds.
#[derive(Debug)]
pub struct TableBuilder {
    rows: usize,
    cols: usize,
    data: Vec<Option<f64>>,
}

impl TableBuilder {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(CostTableError::Table(format!(
                "table dimensions must be positive, got {rows}x{cols}"
            )));
        }
        Ok(Self {
            rows,
            cols,
            data: vec![None; rows * cols],
        })
    }

    fn index(&self, in_channels: usize, out_channels: usize) -> Result<usize> {
        if in_channels == 0 || out_channels == 0 || in_channels > self.rows || out_channels > self.cols {
            return Err(CostTableError::Table(format!(
                "cell ({in_channels}, {out_channels}) outside of {}x{} table",
                self.rows, self.cols
            )));
        }
        Ok((in_channels - 1) * self.cols + out_channels - 1)
    }

    pub fn set(&mut self, in_channels: usize, out_channels: usize, seconds: f64) -> Result<()> {
        let idx = self.index(in_channels, out_channels)?;
        let cell = &mut self.data[idx];
        if cell.is_some() {
            return Err(CostTableError::Table(format!(
                "cell ({in_channels}, {out_channels}) set twice"
            )));
        }
        *cell = Some(seconds);
        Ok(())
    }

    /// Sets every column of a row to the same value.
    pub fn fill_row(&mut self, in_channels: usize, seconds: f64) -> Result<()> {
        for out_channels in 1..=self.cols {
            self.set(in_channels, out_channels, seconds)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<CostTable> {
        let missing = self.data.iter().filter(|c| c.is_none()).count();
        if missing > 0 {
            return Err(CostTableError::Table(format!(
                "{missing} of {} cells were never measured",
                self.data.len()
            )));
        }
        Ok(CostTable {
            rows: self.rows,
            cols: self.cols,
            data: self.data.into_iter().flatten().collect(),
        })
    }
}

/// Cost tables keyed by layer position name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostTableCollection {
    tables: BTreeMap<String, CostTable>,
}

impl CostTableCollection {
    pub fn insert(&mut self, position: impl Into<String>, table: CostTable) -> Result<()> {
        let position = position.into();
        if self.tables.contains_key(&position) {
            return Err(CostTableError::Table(format!(
                "position {position} swept twice"
            )));
        }
        self.tables.insert(position, table);
        Ok(())
    }

    pub fn get(&self, position: &str) -> Option<&CostTable> {
        self.tables.get(position)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn positions(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CostTable)> {
        self.tables.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_builder_indexes_from_one() -> anyhow::Result<()> {
        let mut builder = TableBuilder::new(2, 3)?;
        for i in 1..=2 {
            for o in 1..=3 {
                builder.set(i, o, (10 * i + o) as f64)?;
            }
        }
        let table = builder.finish()?;
        assert_eq!(table.get(1, 1), Some(11.0));
        assert_eq!(table.get(2, 3), Some(23.0));
        assert_eq!(table.get(0, 1), None);
        assert_eq!(table.get(3, 1), None);
        assert_eq!(table.row(2), Some(&[21.0, 22.0, 23.0][..]));
        let cells: Vec<_> = table.cells().collect();
        assert_eq!(cells[4], (2, 2, 22.0));
        Ok(())
    }

    #[test]
    fn test_builder_rejects_double_set_and_out_of_range() -> anyhow::Result<()> {
        let mut builder = TableBuilder::new(1, 1)?;
        builder.set(1, 1, 0.5)?;
        assert!(builder.set(1, 1, 0.5).is_err());
        assert!(builder.set(2, 1, 0.5).is_err());
        assert!(builder.set(1, 0, 0.5).is_err());
        assert!(TableBuilder::new(0, 4).is_err());
        Ok(())
    }

    #[test]
    fn test_partial_table_cannot_finish() -> anyhow::Result<()> {
        let mut builder = TableBuilder::new(2, 2)?;
        builder.fill_row(1, 1.0)?;
        assert!(matches!(builder.finish(), Err(CostTableError::Table(_))));
        Ok(())
    }

    #[test]
    fn test_collection_rejects_duplicate_positions() -> anyhow::Result<()> {
        let mut builder = TableBuilder::new(1, 2)?;
        builder.fill_row(1, 0.25)?;
        let table = builder.finish()?;
        let mut collection = CostTableCollection::default();
        collection.insert("FC", table.clone())?;
        assert!(collection.insert("FC", table).is_err());
        assert_eq!(collection.positions().collect::<Vec<_>>(), vec!["FC"]);
        Ok(())
    }
}
