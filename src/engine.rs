//! Engine orchestrating window generators and MAC units over one pixel clock.

use log::{debug, trace, warn};
use ndarray::{s, Array1, Array3, ArrayView3, ArrayView4};

use crate::{
    mac::MacUnit,
    params::{Error, Params, Result},
    weights::{WeightBank, WeightStore},
    window::WindowGenerator,
};

/// Streaming convolution engine.
///
/// The engine owns one [`WindowGenerator`] per input channel and one
/// [`MacUnit`] per filter, and advances them in lock step: each call to
/// [`step()`](Self::step()) models one tick of a shared pixel clock. A tick
/// optionally latches one pixel per channel, and emits at most one output
/// event. An event is the vector of all filter responses for one window
/// position; events appear in strict row-major position order.
///
/// Output is gated on two conditions reduced over all components: every
/// generator must have its window ready, and every weight matrix must have
/// been obtained from the weight store. Weights are requested from the store
/// on every tick until the whole set is cached; the cache then lives as long
/// as the engine (restarting a frame does not flush it, [`reset()`] does).
///
/// If the consumer side stalls long enough for the input stream to lap a
/// pending window, the ruined position is skipped: the engine logs a
/// warning, advances past it without emitting, and the corresponding cell
/// stays at whatever the consumer initialized it to.
///
/// [`reset()`]: Self::reset()
///
/// # Examples
///
/// ```
/// use ndarray::{Array3, Array4};
/// use stream_convolution::{ConvEngine, Params};
///
/// # fn main() -> stream_convolution::Result<()> {
/// let params = Params {
///     image_width: 8,
///     image_height: 8,
///     ..Params::default()
/// };
/// // A single 3x3 edge-ish filter on a single channel.
/// let filters = Array4::from_shape_vec(
///     [1, 3, 3, 1],
///     vec![0, -1, 0, -1, 4, -1, 0, -1, 0],
/// )
/// .unwrap();
/// let mut engine = ConvEngine::with_filters(params, &filters)?;
///
/// let image = Array3::from_shape_fn([1, 8, 8], |(_, y, x)| (y * 8 + x) as u16);
/// let output = engine.compute(&image)?;
/// assert_eq!(output.shape(), [1, 8, 8]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConvEngine<S: WeightStore = WeightBank> {
    params: Params,
    generators: Vec<WindowGenerator>,
    macs: Vec<MacUnit>,
    store: S,
    /// `(filter, channel)` pairs whose matrices are not cached yet.
    pending_weights: Vec<(usize, usize)>,
    emitted: usize,
    skipped: usize,
}

impl ConvEngine<WeightBank> {
    /// Creates an engine over an in-memory filter bank.
    ///
    /// # Parameters
    ///
    /// - `filters` should have `MxK_HxK_WxC` layout, where `M` is the number
    ///   of filters, `K_H` and `K_W` are spatial dimensions of a filter, `C`
    ///   is the number of input channels.
    ///
    /// # Panics
    ///
    /// Panics if the filter tensor shape does not agree with `params`.
    pub fn with_filters<'a>(
        params: Params,
        filters: impl Into<ArrayView4<'a, i32>>,
    ) -> Result<Self> {
        let filters = filters.into();
        assert_eq!(
            filters.shape()[0],
            params.num_filters,
            "Filter count in parameters and filter tensor must agree"
        );
        assert_eq!(
            [filters.shape()[1], filters.shape()[2]],
            [params.kernel_size, params.kernel_size],
            "Filter dimensions must agree with the kernel size"
        );
        assert_eq!(
            filters.shape()[3],
            params.in_channels,
            "Channel dimensionality in parameters and filters must agree"
        );
        Self::new(params, WeightBank::new(filters))
    }
}

impl<S: WeightStore> ConvEngine<S> {
    /// Creates an idle engine polling `store` for its weights.
    pub fn new(params: Params, store: S) -> Result<Self> {
        params.validate()?;
        let generators = (0..params.in_channels)
            .map(|_| WindowGenerator::new(params))
            .collect();
        let macs = (0..params.num_filters).map(|_| MacUnit::new(params)).collect();
        Ok(Self {
            params,
            generators,
            macs,
            store,
            pending_weights: Self::all_weight_pairs(&params),
            emitted: 0,
            skipped: 0,
        })
    }

    fn all_weight_pairs(params: &Params) -> Vec<(usize, usize)> {
        (0..params.num_filters)
            .flat_map(|filter| (0..params.in_channels).map(move |channel| (filter, channel)))
            .collect()
    }

    /// Returns general parameters of the engine.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Checks whether every weight matrix has been cached from the store.
    pub fn weights_loaded(&self) -> bool {
        self.pending_weights.is_empty()
    }

    /// Returns `true` once the window sweep of the current frame completed.
    pub fn is_done(&self) -> bool {
        self.generators.iter().all(WindowGenerator::is_done)
    }

    /// Returns the `(row, column)` center of the window the engine will emit
    /// or skip next. Events returned by [`step()`](Self::step()) belong to
    /// the anchor as of the start of that call.
    pub fn anchor(&self) -> (usize, usize) {
        self.generators[0].anchor()
    }

    /// Begins a new frame: rewinds every generator to the top-left corner of
    /// the image. The weight cache is kept, so frames can be streamed
    /// back to back against the same filters.
    pub fn start_frame(&mut self) {
        for generator in &mut self.generators {
            generator.start_frame();
        }
        self.emitted = 0;
        self.skipped = 0;
        debug!(
            "started {}x{} frame over {} channels",
            self.params.image_width, self.params.image_height, self.params.in_channels
        );
    }

    /// Returns the engine to its post-construction state: line buffers are
    /// cleared and the weight cache is flushed, forcing a fresh round of
    /// store polls on the next frame.
    pub fn reset(&mut self) {
        for generator in &mut self.generators {
            generator.reset();
        }
        for mac in &mut self.macs {
            mac.clear_weights();
        }
        self.pending_weights = Self::all_weight_pairs(&self.params);
        self.emitted = 0;
        self.skipped = 0;
    }

    /// Advances the engine by one tick.
    ///
    /// A `Some(slab)` input latches one pixel per channel, in channel order;
    /// pixels must arrive in row-major image order, one position per tick.
    /// `None` is a bubble: nothing is latched, but weight polling and output
    /// evaluation still take place, which is how a finished stream is
    /// drained of its remaining windows.
    ///
    /// Returns the output event for the pending window position if every
    /// channel window and every weight matrix is ready, `None` otherwise.
    /// If the pending window was overrun by the input stream, it is skipped:
    /// the anchor advances without an event and the position is lost.
    ///
    /// # Panics
    ///
    /// Panics if the slab length differs from the configured channel count,
    /// or if more pixels are pushed into a frame than the image holds.
    pub fn step(&mut self, pixels: Option<&[u16]>) -> Option<Array1<i64>> {
        self.poll_weights();

        if let Some(slab) = pixels {
            assert_eq!(
                slab.len(),
                self.params.in_channels,
                "Pixel slab length must agree with the channel count"
            );
            for (generator, &pixel) in self.generators.iter_mut().zip(slab) {
                generator.push_pixel(pixel);
            }
        }

        if self.generators.iter().any(WindowGenerator::window_overrun) {
            let (y, x) = self.anchor();
            warn!(
                "window at ({}, {}) was overrun by the input stream; dropping its output",
                y, x
            );
            for generator in &mut self.generators {
                generator.advance();
            }
            self.skipped += 1;
            self.log_if_done();
            return None;
        }

        let ready =
            self.weights_loaded() && self.generators.iter().all(WindowGenerator::window_ready);
        if !ready {
            return None;
        }

        let (y, x) = self.anchor();
        let windows: Vec<_> = self
            .generators
            .iter()
            .map(WindowGenerator::window)
            .collect();
        let outputs: Vec<i64> = self.macs.iter().map(|mac| mac.accumulate(&windows)).collect();
        for generator in &mut self.generators {
            generator.advance();
        }
        self.emitted += 1;
        trace!("emitted event for window at ({}, {})", y, x);
        self.log_if_done();
        Some(Array1::from_vec(outputs))
    }

    /// Convolves a whole frame, driving [`step()`](Self::step()) with one
    /// pixel slab per tick and then draining the stream until the sweep
    /// completes.
    ///
    /// # Parameters
    ///
    /// - `signal` should have `CxHxW` layout matching the configured channel
    ///   count and image size.
    ///
    /// # Return value
    ///
    /// The output has `M x ceil(H / stride) x ceil(W / stride)` layout, one
    /// plane per filter. Positions dropped while the weight store lagged
    /// read as zeros. If the store never becomes ready and the drain makes
    /// no progress for a whole frame interval, [`Error::StalledStream`] is
    /// returned.
    ///
    /// # Panics
    ///
    /// Panics if the signal shape does not agree with the engine parameters.
    pub fn compute<'a>(
        &mut self,
        signal: impl Into<ArrayView3<'a, u16>>,
    ) -> Result<Array3<i64>> {
        let signal = signal.into();
        assert_eq!(
            signal.shape()[0],
            self.params.in_channels,
            "Channel dimensionality in signal and parameters must agree"
        );
        assert_eq!(
            [signal.shape()[1], signal.shape()[2]],
            [self.params.image_height, self.params.image_width],
            "Spatial dimensions in signal and parameters must agree"
        );

        let out_rows = self.params.output_rows();
        let out_cols = self.params.output_cols();
        let mut output = Array3::zeros([self.params.num_filters, out_rows, out_cols]);
        let stride = self.params.stride;

        self.start_frame();
        let mut slab = vec![0_u16; self.params.in_channels];
        for row in 0..self.params.image_height {
            for col in 0..self.params.image_width {
                for (channel, pixel) in slab.iter_mut().enumerate() {
                    *pixel = signal[[channel, row, col]];
                }
                let (y, x) = self.anchor();
                if let Some(event) = self.step(Some(&slab)) {
                    output.slice_mut(s![.., y / stride, x / stride]).assign(&event);
                }
            }
        }

        // The input is exhausted; feed bubbles until the sweep completes.
        // The store gets one frame interval of extra polls before the
        // stream is declared stalled.
        let max_idle = self.params.image_width * self.params.image_height;
        let mut idle = 0;
        while !self.is_done() {
            let before = self.emitted + self.skipped;
            let (y, x) = self.anchor();
            if let Some(event) = self.step(None) {
                output.slice_mut(s![.., y / stride, x / stride]).assign(&event);
            }
            if self.emitted + self.skipped == before {
                idle += 1;
                if idle > max_idle {
                    return Err(Error::StalledStream {
                        emitted: self.emitted,
                        expected: self.params.output_positions(),
                    });
                }
            } else {
                idle = 0;
            }
        }
        Ok(output)
    }

    fn poll_weights(&mut self) {
        if self.pending_weights.is_empty() {
            return;
        }
        let mut still_pending = Vec::with_capacity(self.pending_weights.len());
        for &(filter, channel) in &self.pending_weights {
            match self.store.fetch(filter, channel) {
                Some(matrix) => self.macs[filter].set_channel_weights(channel, matrix.view()),
                None => still_pending.push((filter, channel)),
            }
        }
        if still_pending.is_empty() {
            debug!(
                "weight cache complete: {} filters x {} channels",
                self.params.num_filters, self.params.in_channels
            );
        }
        self.pending_weights = still_pending;
    }

    fn log_if_done(&self) {
        if self.is_done() {
            debug!(
                "frame complete: {} events emitted, {} positions dropped",
                self.emitted, self.skipped
            );
        }
    }
}
