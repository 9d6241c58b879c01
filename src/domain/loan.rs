//! Loaned sample batches.

use super::reader_cache::ReaderCache;
use crate::types::Sample;
use std::slice;
use std::sync::Arc;

/// A batch of samples taken from a reader.
///
/// The samples keep occupying reader capacity until the loan is dropped,
/// which happens on every exit path of the scope holding it.
pub struct LoanedSamples<T> {
    samples: Vec<Sample<T>>,
    cache: Arc<ReaderCache<T>>,
}

impl<T> LoanedSamples<T> {
    pub(crate) fn new(samples: Vec<Sample<T>>, cache: Arc<ReaderCache<T>>) -> Self {
        Self { samples, cache }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Sample<T>> {
        self.samples.iter()
    }

    /// Number of samples that carry data.
    pub fn valid_count(&self) -> usize {
        self.samples.iter().filter(|s| s.is_valid()).count()
    }
}

impl<'a, T> IntoIterator for &'a LoanedSamples<T> {
    type Item = &'a Sample<T>;
    type IntoIter = slice::Iter<'a, Sample<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl<T> Drop for LoanedSamples<T> {
    fn drop(&mut self) {
        self.cache.return_loan();
    }
}
