use rayon::prelude::*;

#[cfg(test)]
/// Method to compare two f32 values. This is for testing
pub fn cmp_f32_vec(l: &[f32], r: &[f32], eps: f32) -> bool {
    assert_eq!(l.len(), r.len());
    for i in 0..l.len() {
        if (l[i] - r[i]).abs() > eps {
            return false;
        }
    }
    true
}

/// Sparse datatype: dimension, indices, values
#[derive(Debug, Clone, PartialEq)]
pub struct Sparse(pub usize, pub Vec<usize>, pub Vec<f32>);

impl Sparse {
    /// Converts a sparse vector to a dense vector
    pub fn to_dense(&self) -> Vec<f32> {
        let mut d = vec![0.; self.0];
        for i in 0..self.1.len() {
            d[self.1[i]] = self.2[i];
        }
        d
    }
}

/// Dense row-major matrix; one row per sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Wraps a row-major buffer.  Returns `None` if the sizes disagree.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        if rows * cols != data.len() {
            return None;
        }
        Some(Matrix {
            rows: rows,
            cols: cols,
            data: data,
        })
    }

    /// All zeros
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix {
            rows: rows,
            cols: cols,
            data: vec![0.; rows * cols],
        }
    }

    /// Stacks equally sized rows.  Returns `None` if the rows are ragged.
    pub fn from_rows(rows: &[Vec<f32>]) -> Option<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != cols) {
            return None;
        }
        let data = rows.iter().flat_map(|r| r.iter().cloned()).collect();
        Matrix::new(rows.len(), cols, data)
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Row `i`
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Row `i`, writable
    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Iterates over rows
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks(0) panics, so empty rows are yielded explicitly
        let cols = self.cols;
        (0..self.rows).map(move |i| &self.data[i * cols..(i + 1) * cols])
    }

    /// Raw buffer
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Gathers `indices` into a new matrix, in order
    pub fn select(&self, indices: &[usize]) -> Matrix {
        let cols = self.cols;
        let mut data = vec![0f32; indices.len() * cols];
        if cols > 0 {
            data.par_chunks_mut(cols)
                .zip(indices.par_iter())
                .for_each(|(out, idx)| out.copy_from_slice(self.row(*idx)));
        }
        Matrix {
            rows: indices.len(),
            cols: cols,
            data: data,
        }
    }
}

#[cfg(test)]
mod test_datatypes {
    use super::*;

    #[test]
    fn test_sparse_to_dense() {
        let s = Sparse(5, vec![1, 4], vec![2., -1.]);
        assert_eq!(s.to_dense(), vec![0., 2., 0., 0., -1.]);
    }

    #[test]
    fn test_matrix() {
        assert!(Matrix::new(2, 2, vec![0.; 3]).is_none());
        assert!(Matrix::from_rows(&[vec![1.], vec![1., 2.]]).is_none());

        let m = Matrix::from_rows(&[vec![1., 2.], vec![3., 4.], vec![5., 6.]]).unwrap();
        assert_eq!((m.rows(), m.cols()), (3, 2));
        assert_eq!(m.row(1), &[3., 4.]);

        let s = m.select(&[2, 0, 2]);
        assert_eq!(s.as_slice(), &[5., 6., 1., 2., 5., 6.]);
        assert!(cmp_f32_vec(s.row(0), &[5., 6.], 1e-6));

        let rows: Vec<&[f32]> = m.iter_rows().collect();
        assert_eq!(rows.len(), 3);
    }
}
