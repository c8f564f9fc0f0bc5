//! Weight storage and the weight readiness protocol.

use ndarray::{s, Array2, Array4, ArrayView4};

use crate::params::Signedness;

/// Source of filter weights for a convolution engine.
///
/// The engine polls the store while streaming: on every step it re-requests
/// each `(filter, channel)` matrix it has not cached yet, and holds all
/// output until the whole set is cached. Returning `None` signals that a
/// matrix is not available yet; the engine retries on the next step. Once
/// returned, a matrix is cached for the lifetime of the engine and the store
/// is not consulted for it again until the engine is reset.
pub trait WeightStore {
    /// Requests the `K x K` weight matrix for one filter / channel pair.
    ///
    /// Implementations may return `None` for any number of steps (e.g. while
    /// weights stream in from a slow backing medium) and may become ready in
    /// any per-pair order.
    fn fetch(&mut self, filter: usize, channel: usize) -> Option<Array2<i32>>;
}

/// In-memory weight store wrapping a complete filter bank.
///
/// The bank is always ready: every [`fetch`](WeightStore::fetch) succeeds
/// immediately. Filters use the `MxK_HxK_WxC` layout, where `M` is the number
/// of filters, `K_H` and `K_W` are spatial dimensions of a filter and `C` is
/// the number of input channels.
#[derive(Debug, Clone)]
pub struct WeightBank {
    filters: Array4<i32>,
}

impl WeightBank {
    /// Creates a bank from a filter tensor in the `MxK_HxK_WxC` layout.
    ///
    /// # Panics
    ///
    /// Panics if the spatial dimensions of the tensor are not square, or if
    /// the filter or channel dimension is empty.
    pub fn new<'a>(filters: impl Into<ArrayView4<'a, i32>>) -> Self {
        let filters = filters.into();
        assert_eq!(
            filters.shape()[1],
            filters.shape()[2],
            "Filters must be spatially square"
        );
        assert!(
            filters.shape()[0] > 0 && filters.shape()[3] > 0,
            "Filter bank must contain at least one filter and one channel"
        );
        Self {
            filters: filters.to_owned(),
        }
    }

    /// Number of filters in the bank.
    pub fn filter_count(&self) -> usize {
        self.filters.shape()[0]
    }

    /// Spatial size of the stored filters.
    pub fn kernel_size(&self) -> usize {
        self.filters.shape()[1]
    }

    /// Number of input channels the bank covers.
    pub fn channel_count(&self) -> usize {
        self.filters.shape()[3]
    }
}

impl WeightStore for WeightBank {
    /// Always succeeds for in-range indices.
    ///
    /// # Panics
    ///
    /// Panics if `filter` or `channel` is out of range for the bank.
    fn fetch(&mut self, filter: usize, channel: usize) -> Option<Array2<i32>> {
        assert!(
            filter < self.filter_count() && channel < self.channel_count(),
            "Filter / channel index ({}, {}) out of range for a bank of {} filters x {} channels",
            filter,
            channel,
            self.filter_count(),
            self.channel_count()
        );
        Some(self.filters.slice(s![filter, .., .., channel]).to_owned())
    }
}

/// Wraps a raw weight into `width` bits, reinterpreting the truncated value
/// according to `signedness`. Mirrors how an over-wide write lands in a
/// hardware weight register.
pub(crate) fn wrap_weight(raw: i32, width: u32, signedness: Signedness) -> i32 {
    let mask = (1_u32 << width) - 1;
    let masked = (raw as u32) & mask;
    match signedness {
        Signedness::Unsigned => masked as i32,
        Signedness::Signed => ((masked << (32 - width)) as i32) >> (32 - width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_unsigned_weights() {
        assert_eq!(wrap_weight(0, 8, Signedness::Unsigned), 0);
        assert_eq!(wrap_weight(255, 8, Signedness::Unsigned), 255);
        assert_eq!(wrap_weight(256, 8, Signedness::Unsigned), 0);
        assert_eq!(wrap_weight(300, 8, Signedness::Unsigned), 44);
        assert_eq!(wrap_weight(-1, 8, Signedness::Unsigned), 255);
        assert_eq!(wrap_weight(5, 3, Signedness::Unsigned), 5);
        assert_eq!(wrap_weight(8, 3, Signedness::Unsigned), 0);
    }

    #[test]
    fn wrapping_signed_weights() {
        assert_eq!(wrap_weight(127, 8, Signedness::Signed), 127);
        assert_eq!(wrap_weight(128, 8, Signedness::Signed), -128);
        assert_eq!(wrap_weight(255, 8, Signedness::Signed), -1);
        assert_eq!(wrap_weight(-1, 8, Signedness::Signed), -1);
        assert_eq!(wrap_weight(-128, 8, Signedness::Signed), -128);
        assert_eq!(wrap_weight(-129, 8, Signedness::Signed), 127);
        assert_eq!(wrap_weight(3, 2, Signedness::Signed), -1);
        assert_eq!(wrap_weight(1, 1, Signedness::Signed), -1);
    }

    #[test]
    fn bank_slices_out_filter_channel_planes() {
        let filters = Array4::from_shape_fn([2, 3, 3, 4], |(f, i, j, c)| {
            (f * 1_000 + c * 100 + i * 10 + j) as i32
        });
        let mut bank = WeightBank::new(&filters);
        assert_eq!(bank.filter_count(), 2);
        assert_eq!(bank.kernel_size(), 3);
        assert_eq!(bank.channel_count(), 4);

        let matrix = bank.fetch(1, 2).unwrap();
        let expected = Array2::from_shape_fn([3, 3], |(i, j)| (1_200 + i * 10 + j) as i32);
        assert_eq!(matrix, expected);
    }

    #[test]
    #[should_panic(expected = "spatially square")]
    fn bank_rejects_non_square_filters() {
        let filters = Array4::<i32>::zeros([2, 3, 5, 4]);
        WeightBank::new(&filters);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn bank_checks_fetch_indices() {
        let filters = Array4::<i32>::zeros([2, 3, 3, 4]);
        let mut bank = WeightBank::new(&filters);
        bank.fetch(2, 0);
    }
}
