use crate::datatypes::Sparse;

/// The trait for parsing the feature part of a line
pub trait DataParse: Sync {
    /// Parses the feature tokens of one line into a dense vector, or `None`
    /// if a token is malformed
    fn parse<'a, I: Iterator<Item = &'a str>>(&self, xs: I) -> Option<Vec<f32>>;
}

#[derive(Debug, Clone)]
/// Positional features: every token is a value, optionally prefixed `idx:`
pub struct DenseData;

impl DataParse for DenseData {
    fn parse<'a, I: Iterator<Item = &'a str>>(&self, xs: I) -> Option<Vec<f32>> {
        xs.map(|x| x.split(':').last().and_then(|x| x.parse().ok()))
            .collect()
    }
}

#[derive(Debug, Clone)]
/// `idx:value` features, densified to a fixed dimension.  Indices at or past
/// the dimension are dropped, duplicates keep their first value.
pub struct SparseData(pub usize);

impl SparseData {
    /// Parses into the sparse representation
    pub fn parse_sparse<'a, I: Iterator<Item = &'a str>>(&self, xs: I) -> Option<Sparse> {
        let mut iv: Vec<(usize, f32)> = Vec::new();
        for xi in xs {
            let mut p = xi.split(':');
            match (p.next(), p.next(), p.next()) {
                (Some(idx), Some(val), None) => match (idx.parse(), val.parse()) {
                    (Ok(idx), Ok(v)) => iv.push((idx, v)),
                    _ => return None,
                },
                _ => return None,
            }
        }
        // Sort then dedup by key
        iv.sort_by_key(|x| x.0);
        iv.dedup_by_key(|x| x.0);
        let (is, vs): (Vec<_>, Vec<_>) = iv
            .into_iter()
            .filter(|x| x.0 < self.0 && x.1 != 0.0)
            .unzip();

        Some(Sparse(self.0, is, vs))
    }
}

impl DataParse for SparseData {
    fn parse<'a, I: Iterator<Item = &'a str>>(&self, xs: I) -> Option<Vec<f32>> {
        self.parse_sparse(xs).map(|s| s.to_dense())
    }
}
