//! Streaming 2D convolutions over row-major pixel streams.
//!
//! [Convolution] is a fundamental building block of [convolutional neural networks][cnn].
//! This crate computes fixed-configuration 2D convolution layers the way streaming
//! hardware does: pixels arrive one per channel per tick in row-major order, are
//! retained in per-channel line buffers just long enough to assemble kernel windows,
//! and each completed window is immediately reduced by per-filter integer
//! multiply-accumulate units. The image is never materialized as a whole; memory
//! scales with `kernel_size + 1` buffered rows per channel regardless of image height.
//!
//! # Features
//!
//! - Odd square kernels from 1x1 to 31x31, with configurable stride and zero
//!   padding. Window centers sweep every stride-th position of the image, so a
//!   frame yields `ceil(H / stride) * ceil(W / stride)` output positions.
//! - Configurable integer lanes: unsigned pixels up to 16 bits, signed or unsigned
//!   weights up to 16 bits, and outputs saturated into a signed or unsigned lane of
//!   up to 32 bits.
//! - Multi-channel inputs and multi-filter layers; every output event carries one
//!   scalar per filter for one spatial position.
//! - Pluggable weight sources through the [`WeightStore`] trait. Weight readiness
//!   gates output without ever stalling pixel intake.
//!
//! # Implementation details
//!
//! Each input channel owns a [`WindowGenerator`] with a line-buffer ring of
//! `kernel_size + 1` rows; row slots are zeroed and reused as the stream moves past
//! them. The [`ConvEngine`] advances all generators on a shared tick and gates
//! emission on an AND-reduction of per-channel window readiness and weight-cache
//! completeness, so every event is the complete filter response for its position,
//! and events appear in strict row-major order. A window whose buffered rows were
//! evicted before it could be emitted (possible only when the output side stalls
//! while pixels keep arriving) is skipped rather than emitted corrupt.
//!
//! [Convolution]: https://en.wikipedia.org/wiki/Convolution
//! [cnn]: https://en.wikipedia.org/wiki/Convolutional_neural_network
//!
//! # Examples
//!
//! ## Whole-frame convolution
//!
//! ```
//! use ndarray::{Array3, Array4};
//! use rand::{thread_rng, Rng};
//! use stream_convolution::{ConvEngine, Params};
//!
//! # fn main() -> stream_convolution::Result<()> {
//! let params = Params {
//!     in_channels: 3,
//!     num_filters: 2,
//!     image_width: 6,
//!     image_height: 6,
//!     ..Params::default()
//! };
//! // Random 8-bit signal with 6x6 spatial dims and 3 channels.
//! let mut rng = thread_rng();
//! let image = Array3::from_shape_fn([3, 6, 6], |_| rng.gen_range(0..=255));
//! // Construct two 3x3 spatial filters.
//! let filters = Array4::from_shape_fn([2, 3, 3, 3], |_| rng.gen_range(-128..128));
//! let mut engine = ConvEngine::with_filters(params, &filters)?;
//!
//! // One output plane per filter; the default single-pixel padding keeps
//! // spatial dims.
//! let output = engine.compute(&image)?;
//! assert_eq!(output.shape(), [2, 6, 6]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Driving the stream by hand
//!
//! ```
//! use ndarray::Array4;
//! use stream_convolution::{ConvEngine, Params};
//!
//! # fn main() -> stream_convolution::Result<()> {
//! let params = Params {
//!     image_width: 4,
//!     image_height: 4,
//!     ..Params::default()
//! };
//! let filters = Array4::from_elem([1, 3, 3, 1], 1);
//! let mut engine = ConvEngine::with_filters(params, &filters)?;
//!
//! engine.start_frame();
//! let mut events = vec![];
//! for pixel in 0..16_u16 {
//!     if let Some(event) = engine.step(Some(&[pixel])) {
//!         events.push(event);
//!     }
//! }
//! // Windows overhanging the bottom edge drain on bubble ticks.
//! while !engine.is_done() {
//!     if let Some(event) = engine.step(None) {
//!         events.push(event);
//!     }
//! }
//! assert_eq!(events.len(), 16);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs, missing_debug_implementations)]

mod engine;
mod mac;
mod params;
mod weights;
mod window;

pub use crate::{
    engine::ConvEngine,
    mac::{saturate, MacUnit},
    params::{Error, Params, Result, Signedness},
    weights::{WeightBank, WeightStore},
    window::{GeneratorState, WindowGenerator},
};
