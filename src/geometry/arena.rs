//! Flat storage for metric and mass-matrix buffers.
//!
//! Elements and faces hold [`MetricSpan`] handles instead of references, so
//! the backing vector can grow while spans stay valid.

/// `(offset, len)` window into a [`MetricArena`]. The default span is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MetricSpan {
    pub offset: usize,
    pub len: usize,
}

impl MetricSpan {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

#[derive(Clone, Debug, Default)]
pub struct MetricArena {
    data: Vec<f64>,
}

impl MetricArena {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            data: Vec::with_capacity(n),
        }
    }

    /// Append `values` and return their span.
    pub fn push(&mut self, values: &[f64]) -> MetricSpan {
        let offset = self.data.len();
        self.data.extend_from_slice(values);
        MetricSpan {
            offset,
            len: values.len(),
        }
    }

    pub fn get(&self, span: MetricSpan) -> &[f64] {
        &self.data[span.offset..span.end()]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spans_survive_growth() {
        let mut a = MetricArena::default();
        let s0 = a.push(&[1.0, 2.0]);
        let s1 = a.push(&[0.0, 0.0, 7.0]);
        let s2 = a.push(&[9.0; 100]);
        assert_eq!(a.get(s0), &[1.0, 2.0]);
        assert_eq!(a.get(s1), &[0.0, 0.0, 7.0]);
        assert_eq!(s2.offset, 5);
        assert_eq!(a.len(), 105);
        assert!(MetricSpan::default().is_empty());
        assert!(a.get(MetricSpan::default()).is_empty());
    }
}
