//! Per-filter multiply-accumulate units and output saturation.

use ndarray::{Array2, Array3, ArrayView2, Axis};

use std::cmp;

use crate::params::{Params, Signedness};

/// Saturates an accumulator value into a `width`-bit output lane.
///
/// Unsigned lanes clamp to `[0, 2^width - 1]`, signed lanes to
/// `[-2^(width-1), 2^(width-1) - 1]`. Values already inside the lane pass
/// through unchanged, so saturation is idempotent.
pub fn saturate(value: i64, width: u32, signedness: Signedness) -> i64 {
    let (min, max) = match signedness {
        Signedness::Unsigned => (0, (1_i64 << width) - 1),
        Signedness::Signed => (-(1_i64 << (width - 1)), (1_i64 << (width - 1)) - 1),
    };
    cmp::max(min, cmp::min(max, value))
}

/// Multiply-accumulate unit for one filter.
///
/// The unit holds the filter's `K x K` weight matrix for every input channel
/// and reduces a set of per-channel windows into a single saturated output
/// scalar. Weight matrices default to zero until they are installed via
/// [`set_channel_weights()`](Self::set_channel_weights()); the engine
/// installs each matrix as soon as its weight store yields it and only
/// accumulates once every matrix of every unit is in place.
#[derive(Debug, Clone)]
pub struct MacUnit {
    params: Params,
    /// Weight matrices in `C x K x K` layout.
    weights: Array3<i32>,
}

impl MacUnit {
    /// Creates a unit with all weights zeroed.
    ///
    /// # Panics
    ///
    /// Panics if `params` do not pass [`Params::validate()`].
    pub fn new(params: Params) -> Self {
        if let Err(err) = params.validate() {
            panic!("invalid convolution parameters: {}", err);
        }
        let shape = [params.in_channels, params.kernel_size, params.kernel_size];
        Self {
            params,
            weights: Array3::zeros(shape),
        }
    }

    /// Returns the unit parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Installs the weight matrix for one input channel. Each weight is
    /// wrapped into `weight_width` bits and reinterpreted per
    /// `weight_signedness` on the way in.
    ///
    /// # Panics
    ///
    /// Panics if `channel` is out of range or the matrix is not
    /// `kernel_size x kernel_size`.
    pub fn set_channel_weights(&mut self, channel: usize, matrix: ArrayView2<'_, i32>) {
        let size = self.params.kernel_size;
        assert!(
            channel < self.params.in_channels,
            "Channel index {} out of range for {} input channels",
            channel,
            self.params.in_channels
        );
        assert_eq!(
            matrix.shape(),
            [size, size],
            "Weight matrix dimensions must agree with the kernel size"
        );

        let width = self.params.weight_width;
        let signedness = self.params.weight_signedness;
        let mut plane = self.weights.index_axis_mut(Axis(0), channel);
        for (cell, &raw) in plane.iter_mut().zip(matrix.iter()) {
            *cell = crate::weights::wrap_weight(raw, width, signedness);
        }
    }

    /// Clears all weight matrices back to zero.
    pub fn clear_weights(&mut self) {
        self.weights.fill(0);
    }

    /// Computes the filter response for one spatial position: the dot
    /// product of every channel window with that channel's weight matrix,
    /// summed over channels in a 64-bit accumulator and saturated into the
    /// output lane.
    ///
    /// The supported parameter ranges keep the accumulator exact: even at
    /// the 31x31 kernel, 4096 channel, 16-bit extremes the sum stays within
    /// `i64`.
    pub fn accumulate(&self, windows: &[Array2<u16>]) -> i64 {
        debug_assert_eq!(windows.len(), self.params.in_channels);
        let mut sum = 0_i64;
        for (channel, window) in windows.iter().enumerate() {
            let plane = self.weights.index_axis(Axis(0), channel);
            for (&weight, &pixel) in plane.iter().zip(window.iter()) {
                sum += i64::from(weight) * i64::from(pixel);
            }
        }
        saturate(sum, self.params.output_width, self.params.output_signedness)
    }
}
