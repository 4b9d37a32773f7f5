use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("a frame needs at least one column")]
    NoColumns,
    #[error("row {row} has {found} fields, expected {expected}")]
    Arity {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Ordered column names plus rows of exactly that many string fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Frame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, FrameError> {
        let mut frame = Self::empty(columns)?;
        for row in rows {
            frame.push_row(row)?;
        }
        Ok(frame)
    }

    pub fn empty(columns: Vec<String>) -> Result<Self, FrameError> {
        if columns.is_empty() {
            return Err(FrameError::NoColumns);
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn push_row(&mut self, row: Vec<String>) -> Result<(), FrameError> {
        if row.len() != self.columns.len() {
            return Err(FrameError::Arity {
                row: self.rows.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Pads with blanks or truncates so the row fits the column count.
    pub fn push_coerced(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// A new frame holding the first `n` rows.
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| (*f).to_string()).collect()
    }

    #[test]
    fn test_rejects_mismatched_row() {
        let result = Frame::new(
            row(&["a", "b"]),
            vec![row(&["1", "2"]), row(&["3"])],
        );

        assert_eq!(
            result,
            Err(FrameError::Arity {
                row: 1,
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_requires_columns() {
        assert_eq!(Frame::empty(Vec::new()), Err(FrameError::NoColumns));
    }

    #[test]
    fn test_push_coerced() {
        let mut frame = Frame::empty(row(&["a", "b", "c"])).unwrap();
        frame.push_coerced(row(&["1"]));
        frame.push_coerced(row(&["1", "2", "3", "4"]));

        assert_eq!(frame.rows()[0], row(&["1", "", ""]));
        assert_eq!(frame.rows()[1], row(&["1", "2", "3"]));
    }

    #[test]
    fn test_head() {
        let rows = (0..25).map(|i| vec![i.to_string()]).collect();
        let frame = Frame::new(row(&["n"]), rows).unwrap();

        let preview = frame.head(10);
        assert_eq!(preview.len(), 10);
        assert_eq!(preview.rows()[9], row(&["9"]));
        assert_eq!(frame.head(100).len(), 25);
    }
}
