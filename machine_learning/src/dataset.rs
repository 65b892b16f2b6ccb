use std::path::Path;

use comms::specs::DatasetSpec;
use ndarray::{Array2, ArrayView2, Axis};
use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal};

use crate::{MlErr, Result, adapter::AdapterDims};

/// A node's private training samples.
///
/// Each row holds `input_size` input values followed by `output_size` targets.
#[derive(Debug, Clone)]
pub struct Dataset {
    rows: Array2<f32>,
}

impl Dataset {
    /// Creates a new `Dataset` from contiguous rows.
    ///
    /// # Returns
    /// A `Dataset` error if `data` is empty or not a whole amount of rows.
    pub fn new(data: Vec<f32>, input_size: usize, output_size: usize) -> Result<Self> {
        let row_size = input_size + output_size;

        if data.is_empty() {
            return Err(MlErr::Dataset("dataset is empty".into()));
        }

        if row_size == 0 || data.len() % row_size != 0 {
            return Err(MlErr::Dataset(format!(
                "{} values can't be split into rows of {row_size}",
                data.len()
            )));
        }

        let rows = Array2::from_shape_vec((data.len() / row_size, row_size), data)
            .map_err(|e| MlErr::Dataset(e.to_string()))?;

        Ok(Self { rows })
    }

    /// Loads the dataset described by `spec` for the shapes in `dims`.
    pub fn from_spec(spec: &DatasetSpec, dims: AdapterDims) -> Result<Self> {
        match spec {
            DatasetSpec::Inline { data } => Self::new(data.clone(), dims.input(), dims.output()),
            DatasetSpec::Local { path } => Self::from_csv(path, dims.input(), dims.output()),
            DatasetSpec::Synthetic { samples, seed } => {
                Self::synthetic(samples.get(), *seed, dims.input(), dims.output())
            }
        }
    }

    /// Reads a CSV file with one row per line.
    pub fn from_csv(path: &Path, input_size: usize, output_size: usize) -> Result<Self> {
        let row_size = input_size + output_size;
        let content = std::fs::read_to_string(path).map_err(|e| {
            MlErr::Dataset(format!("cannot read dataset '{}': {e}", path.display()))
        })?;

        let mut data = Vec::new();

        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let values = line
                .split(',')
                .map(|v| {
                    v.trim().parse::<f32>().map_err(|_| {
                        MlErr::Dataset(format!("dataset line {i}: cannot parse '{v}' as f32"))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            if values.len() != row_size {
                return Err(MlErr::Dataset(format!(
                    "dataset line {i}: expected {row_size} values, got {}",
                    values.len()
                )));
            }

            data.extend(values);
        }

        Self::new(data, input_size, output_size)
    }

    /// Generates `samples` rows from a seeded random linear map with a little noise.
    pub fn synthetic(
        samples: usize,
        seed: u64,
        input_size: usize,
        output_size: usize,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let unit = Normal::new(0f32, 1.)?;
        let weight = Normal::new(0f32, (1. / input_size.max(1) as f32).sqrt())?;
        let noise = Normal::new(0f32, 0.01)?;

        let map = Array2::from_shape_simple_fn((output_size, input_size), || {
            weight.sample(&mut rng)
        });

        let mut data = Vec::with_capacity(samples * (input_size + output_size));
        for _ in 0..samples {
            let x: Vec<f32> = (0..input_size).map(|_| unit.sample(&mut rng)).collect();
            let y = map.dot(&ndarray::aview1(&x));

            data.extend_from_slice(&x);
            data.extend(y.iter().map(|v| v + noise.sample(&mut rng)));
        }

        Self::new(data, input_size, output_size)
    }

    pub fn len(&self) -> usize {
        self.rows.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `ceil(len / batch_size)`.
    pub fn total_batches(&self, batch_size: usize) -> usize {
        self.len().div_ceil(batch_size.max(1))
    }

    /// Iterates over the dataset in batches of `batch_size` rows, the last one may be short.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = ArrayView2<'_, f32>> {
        self.rows.axis_chunks_iter(Axis(0), batch_size.max(1))
    }

    /// The `index`th batch of `batch_size` rows.
    pub fn batch(&self, index: usize, batch_size: usize) -> Option<ArrayView2<'_, f32>> {
        self.batches(batch_size).nth(index)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn batches_cover_every_row() {
        let dataset = Dataset::new((0..30).map(|x| x as f32).collect(), 2, 1).unwrap();

        assert_eq!(dataset.len(), 10);
        assert_eq!(dataset.total_batches(4), 3);

        let sizes: Vec<_> = dataset.batches(4).map(|b| b.nrows()).collect();
        assert_eq!(sizes, [4, 4, 2]);

        let last = dataset.batch(2, 4).unwrap();
        assert_eq!(last.row(1).to_vec(), [27., 28., 29.]);
        assert!(dataset.batch(3, 4).is_none());
    }

    #[test]
    fn rejects_partial_rows_and_empty_data() {
        assert!(matches!(
            Dataset::new(vec![1., 2., 3., 4.], 2, 1),
            Err(MlErr::Dataset(_))
        ));
        assert!(matches!(Dataset::new(vec![], 2, 1), Err(MlErr::Dataset(_))));
    }

    #[test]
    fn csv_rows() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1, 2, 3").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "4,5,6").unwrap();

        let dataset = Dataset::from_csv(file.path(), 2, 1).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.batch(0, 2).unwrap().row(1).to_vec(), [4., 5., 6.]);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "1,2").unwrap();
        assert!(Dataset::from_csv(bad.path(), 2, 1).is_err());
    }

    #[test]
    fn synthetic_is_seeded() {
        let one = Dataset::synthetic(16, 7, 4, 2).unwrap();
        let two = Dataset::synthetic(16, 7, 4, 2).unwrap();

        assert_eq!(one.len(), 16);
        assert_eq!(one.rows, two.rows);
    }
}
