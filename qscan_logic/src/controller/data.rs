//! Scan matrix and its companion buffers.

use qscan_common::scanner::error::ScanError;
use serde::{Deserialize, Serialize};

/// Counts of one scan session: `repeats x line_length` matrices plus the
/// running sum and mean of every committed trace line.
///
/// Matrix rows are allocated as lines are committed, zero filled up to the
/// highest committed row.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanData {
    rows: usize,
    trace: Vec<Vec<f64>>,
    retrace: Vec<Vec<f64>>,
    sum: Vec<f64>,
    mean: Vec<f64>,
    last_trace: Vec<f64>,
    last_retrace: Vec<f64>,
    rows_written: usize,
}

impl ScanData {
    /// Empty buffers for `rows` lines of `columns` samples.
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            trace: Vec::new(),
            retrace: Vec::new(),
            sum: vec![0.0; columns],
            mean: vec![0.0; columns],
            last_trace: vec![0.0; columns],
            last_retrace: vec![0.0; columns],
            rows_written: 0,
        }
    }

    /// `(rows, columns)` of the trace matrix.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.sum.len())
    }

    /// Trace lines committed so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn is_empty(&self) -> bool {
        self.rows_written == 0
    }

    /// Commit a trace line at `row` and update sum and mean.
    ///
    /// # Errors
    /// `ScanError::Configuration` if `row` or the line length do not fit.
    pub fn record_trace(&mut self, row: usize, line: Vec<f64>) -> Result<(), ScanError> {
        self.check_fit(row, &line)?;
        for (total, &count) in self.sum.iter_mut().zip(&line) {
            *total += count;
        }
        self.rows_written += 1;
        let n = self.rows_written as f64;
        for (mean, &total) in self.mean.iter_mut().zip(&self.sum) {
            *mean = total / n;
        }
        grow_to(&mut self.trace, row, self.sum.len()).clone_from(&line);
        self.last_trace = line;
        Ok(())
    }

    /// Keep a retrace line for display; it never enters sum or mean.
    pub fn record_retrace(&mut self, row: usize, line: Vec<f64>) -> Result<(), ScanError> {
        self.check_fit(row, &line)?;
        grow_to(&mut self.retrace, row, self.sum.len()).clone_from(&line);
        self.last_retrace = line;
        Ok(())
    }

    fn check_fit(&self, row: usize, line: &[f64]) -> Result<(), ScanError> {
        let (rows, columns) = self.shape();
        if row >= rows || line.len() != columns {
            return Err(ScanError::Configuration(format!(
                "line {row} of {} samples does not fit a {rows}x{columns} scan matrix",
                line.len()
            )));
        }
        Ok(())
    }

    /// Trace rows up to the highest committed one.
    pub fn trace_matrix(&self) -> &[Vec<f64>] {
        &self.trace
    }

    pub fn retrace_matrix(&self) -> &[Vec<f64>] {
        &self.retrace
    }

    pub fn sum(&self) -> &[f64] {
        &self.sum
    }

    /// Mean count rate per sample over the committed lines.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn last_trace(&self) -> &[f64] {
        &self.last_trace
    }

    pub fn last_retrace(&self) -> &[f64] {
        &self.last_retrace
    }

    /// Sample index and value of the highest mean count rate.
    pub fn peak(&self) -> Option<(usize, f64)> {
        if self.is_empty() {
            return None;
        }
        self.mean
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

fn grow_to(matrix: &mut Vec<Vec<f64>>, row: usize, columns: usize) -> &mut Vec<f64> {
    if matrix.len() <= row {
        matrix.resize(row + 1, vec![0.0; columns]);
    }
    &mut matrix[row]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_tracks_committed_lines() {
        let mut data = ScanData::new(3, 2);
        assert!(data.is_empty());
        data.record_trace(0, vec![2.0, 4.0]).unwrap();
        data.record_trace(1, vec![4.0, 8.0]).unwrap();
        assert_eq!(data.sum(), &[6.0, 12.0]);
        assert_eq!(data.mean(), &[3.0, 6.0]);
        assert_eq!(data.trace_matrix().len(), 2);
        assert_eq!(data.shape(), (3, 2));
        assert_eq!(data.last_trace(), &[4.0, 8.0]);
        assert_eq!(data.peak(), Some((1, 6.0)));
    }

    #[test]
    fn retrace_stays_out_of_the_mean() {
        let mut data = ScanData::new(1, 2);
        data.record_trace(0, vec![1.0, 1.0]).unwrap();
        data.record_retrace(0, vec![100.0, 100.0]).unwrap();
        assert_eq!(data.mean(), &[1.0, 1.0]);
        assert_eq!(data.retrace_matrix()[0], vec![100.0, 100.0]);
        assert_eq!(data.rows_written(), 1);
    }

    #[test]
    fn rows_are_allocated_on_commit() {
        let mut data = ScanData::new(1_000_000, 1_000);
        assert_eq!(data.shape(), (1_000_000, 1_000));
        assert!(data.trace_matrix().is_empty());
        assert!(data.retrace_matrix().is_empty());

        data.record_trace(2, vec![1.0; 1_000]).unwrap();
        let rows = data.trace_matrix();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].iter().all(|&c| c == 0.0));
        assert_eq!(rows[2], vec![1.0; 1_000]);

        // an earlier row does not shrink the matrix
        data.record_trace(0, vec![2.0; 1_000]).unwrap();
        assert_eq!(data.trace_matrix().len(), 3);
        assert_eq!(data.trace_matrix()[0], vec![2.0; 1_000]);
    }

    #[test]
    fn misfit_lines_leave_buffers_untouched() {
        let mut data = ScanData::new(2, 3);
        let before = data.clone();
        assert!(data.record_trace(2, vec![0.0; 3]).is_err());
        assert!(data.record_trace(0, vec![-1.0]).is_err());
        assert!(data.record_retrace(0, vec![1.0; 4]).is_err());
        assert_eq!(data, before);
        assert_eq!(data.shape(), (2, 3));
        assert_eq!(data.peak(), None);
    }
}
