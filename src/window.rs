//! Per-channel sliding-window generation over a streaming pixel source.

use ndarray::Array2;

use std::cmp;

use crate::params::Params;

/// State of a window generator.
///
/// Generators cycle `Idle -> Load -> Process -> Idle` per frame: `Load`
/// accumulates enough image rows for the first window, `Process` sweeps the
/// window anchor across the frame while further pixels stream in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Not streaming; incoming pixels are not latched.
    Idle,
    /// Buffering initial rows; no window is ready yet.
    Load,
    /// Sweeping windows while the remainder of the frame streams in.
    Process,
}

/// Sliding-window generator for one input channel.
///
/// The generator consumes a row-major pixel stream and produces `K x K`
/// windows centered on every anchor position `(y, x)` with
/// `y in {0, S, 2S, ...} < H` and `x in {0, S, 2S, ...} < W`. Windows are
/// produced in row-major anchor order. Pixels are retained in a line-buffer
/// ring of `K + 1` rows, so a window may be read while the next image row
/// streams in; positions outside the image read as zero padding.
///
/// Emission is split into a peek ([`window_ready()`] / [`window()`]) and a
/// commit ([`advance()`]) so that a caller coordinating several generators
/// can hold all of them on one position until every generator is ready.
///
/// [`window_ready()`]: Self::window_ready()
/// [`window()`]: Self::window()
/// [`advance()`]: Self::advance()
#[derive(Debug, Clone)]
pub struct WindowGenerator {
    params: Params,
    state: GeneratorState,
    buffer: Vec<u16>,
    /// Column of the next pixel write, in image coordinates.
    x_pos: usize,
    /// Row of the next pixel write.
    y_pos: usize,
    pixels_written: usize,
    /// Column of the current window anchor.
    x_window: usize,
    /// Row of the current window anchor.
    y_window: usize,
}

impl WindowGenerator {
    /// Creates an idle generator.
    ///
    /// # Panics
    ///
    /// Panics if `params` do not pass [`Params::validate()`].
    pub fn new(params: Params) -> Self {
        if let Err(err) = params.validate() {
            panic!("invalid convolution parameters: {}", err);
        }
        let buffer_len = params.buffer_rows() * params.buffer_row_len();
        Self {
            params,
            state: GeneratorState::Idle,
            buffer: vec![0; buffer_len],
            x_pos: 0,
            y_pos: 0,
            pixels_written: 0,
            x_window: 0,
            y_window: 0,
        }
    }

    /// Returns the generator parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the current state.
    pub fn state(&self) -> GeneratorState {
        self.state
    }

    /// Returns the `(row, column)` center of the pending window.
    pub fn anchor(&self) -> (usize, usize) {
        (self.y_window, self.x_window)
    }

    /// Returns `true` once the anchor has swept past the last row of a frame.
    pub fn is_done(&self) -> bool {
        self.state == GeneratorState::Idle && self.y_window >= self.params.image_height
    }

    /// Starts a new frame: rewinds write and anchor positions and begins
    /// latching pixels. Ring contents need no explicit clearing; each row
    /// slot is zeroed right before its first column of the new frame lands.
    pub fn start_frame(&mut self) {
        self.x_pos = 0;
        self.y_pos = 0;
        self.pixels_written = 0;
        self.x_window = 0;
        self.y_window = 0;
        self.state = GeneratorState::Load;
        self.maybe_enter_process();
    }

    /// Returns the generator to the idle state and clears the line buffer.
    pub fn reset(&mut self) {
        self.x_pos = 0;
        self.y_pos = 0;
        self.pixels_written = 0;
        self.x_window = 0;
        self.y_window = 0;
        self.state = GeneratorState::Idle;
        for cell in &mut self.buffer {
            *cell = 0;
        }
    }

    /// Latches one pixel into the line buffer and advances the write
    /// position in row-major order. The pixel is truncated to `data_width`
    /// bits. Pixels offered while the generator is idle (before a frame
    /// starts, or after a strided sweep finished early) are discarded.
    ///
    /// # Panics
    ///
    /// Panics if more than `image_width * image_height` pixels are pushed
    /// into an active frame.
    pub fn push_pixel(&mut self, pixel: u16) {
        if self.state == GeneratorState::Idle {
            return;
        }
        assert!(
            self.pixels_written < self.params.image_width * self.params.image_height,
            "Pixel stream exceeds the configured {}x{} frame",
            self.params.image_width,
            self.params.image_height
        );

        let row_len = self.params.buffer_row_len();
        let slot = (self.y_pos % self.params.buffer_rows()) * row_len;
        if self.x_pos == 0 {
            for cell in &mut self.buffer[slot..slot + row_len] {
                *cell = 0;
            }
        }
        self.buffer[slot + self.x_pos + self.params.padding] = pixel & self.params.data_mask();

        self.pixels_written += 1;
        self.x_pos += 1;
        if self.x_pos == self.params.image_width {
            self.x_pos = 0;
            self.y_pos += 1;
        }
        self.maybe_enter_process();
    }

    /// Checks whether the pending window can be materialized.
    ///
    /// A window is ready once the pixel at its bottom-right in-image corner
    /// has been latched (corner coordinates are clamped to the image, so
    /// windows hanging over the right or bottom edge become ready as soon as
    /// their last existing pixel arrives) and the rows it spans are still
    /// resident in the ring.
    pub fn window_ready(&self) -> bool {
        if self.state != GeneratorState::Process || self.y_window >= self.params.image_height {
            return false;
        }
        if self.window_overrun() {
            return false;
        }
        let corner_y = cmp::min(
            self.y_window + self.params.half_kernel(),
            self.params.image_height - 1,
        );
        let corner_x = cmp::min(
            self.x_window + self.params.half_kernel(),
            self.params.image_width - 1,
        );
        self.pixels_written > corner_y * self.params.image_width + corner_x
    }

    /// Checks whether the input stream has lapped the pending window, i.e.
    /// whether a row the window needs was already evicted from the ring.
    /// This can only happen if the consumer stalls while pixels keep
    /// streaming in; the window can then never be emitted and must be
    /// skipped via [`advance()`](Self::advance()).
    pub fn window_overrun(&self) -> bool {
        if self.state != GeneratorState::Process || self.y_window >= self.params.image_height {
            return false;
        }
        let low_row = self.y_window.saturating_sub(self.params.half_kernel());
        low_row < self.oldest_resident_row()
    }

    /// Materializes the pending window. Positions outside the image
    /// contribute zeros.
    ///
    /// The result is only meaningful while [`window_ready()`](Self::window_ready())
    /// holds; cells whose pixels have not arrived yet read as zero or as
    /// stale ring data.
    pub fn window(&self) -> Array2<u16> {
        let size = self.params.kernel_size;
        let half = self.params.half_kernel() as isize;
        let height = self.params.image_height as isize;
        let width = self.params.image_width as isize;
        let row_len = self.params.buffer_row_len();

        Array2::from_shape_fn([size, size], |(i, j)| {
            let y = self.y_window as isize + i as isize - half;
            let x = self.x_window as isize + j as isize - half;
            if y < 0 || y >= height || x < 0 || x >= width {
                0
            } else {
                let slot = (y as usize % self.params.buffer_rows()) * row_len;
                self.buffer[slot + x as usize + self.params.padding]
            }
        })
    }

    /// Commits the pending window position and moves the anchor one stride
    /// in row-major order. Once the anchor passes the last image row the
    /// generator returns to idle and [`is_done()`](Self::is_done()) reports
    /// `true`.
    pub fn advance(&mut self) {
        self.x_window += self.params.stride;
        if self.x_window >= self.params.image_width {
            self.x_window = 0;
            self.y_window += self.params.stride;
            if self.y_window >= self.params.image_height {
                self.state = GeneratorState::Idle;
            }
        }
    }

    /// Oldest image row still fully readable from the ring. The row slot
    /// about to be overwritten stays readable until the first column of the
    /// incoming row actually lands.
    fn oldest_resident_row(&self) -> usize {
        let slack = if self.x_pos == 0 {
            self.params.buffer_rows()
        } else {
            self.params.kernel_size
        };
        self.y_pos.saturating_sub(slack)
    }

    /// The sweep may start as soon as enough rows are latched for the first
    /// window; `window_ready()` enforces the exact per-window condition, so
    /// the threshold only needs to keep the anchor from outpacing the ring.
    /// Capping at `half_kernel` keeps the startup lag within what the ring
    /// can sustain for low-padding configurations.
    fn maybe_enter_process(&mut self) {
        let threshold = cmp::min(
            self.params.kernel_size.saturating_sub(self.params.padding + 1),
            self.params.half_kernel(),
        );
        if self.state == GeneratorState::Load && self.y_pos >= threshold {
            self.state = GeneratorState::Process;
        }
    }
}
