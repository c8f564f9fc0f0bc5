//! Engine configuration and the crate-wide error type.

use thiserror::Error;

/// Largest supported kernel side length.
pub(crate) const MAX_KERNEL_SIZE: usize = 31;
/// Largest supported padding; `(MAX_KERNEL_SIZE - 1) / 2`, the widest padding
/// that can ever influence a window.
pub(crate) const MAX_PADDING: usize = 15;
/// Largest supported channel count.
pub(crate) const MAX_CHANNELS: usize = 4096;
/// Largest supported filter count.
pub(crate) const MAX_FILTERS: usize = 4096;
/// Largest supported pixel width in bits.
pub(crate) const MAX_DATA_WIDTH: u32 = 16;
/// Largest supported weight width in bits.
pub(crate) const MAX_WEIGHT_WIDTH: u32 = 16;
/// Largest supported output width in bits.
pub(crate) const MAX_OUTPUT_WIDTH: u32 = 32;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Signedness of a configurable integer lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signedness {
    /// Values occupy `[0, 2^width - 1]`.
    Unsigned,
    /// Two's-complement values occupy `[-2^(width-1), 2^(width-1) - 1]`.
    Signed,
}

/// General parameters of a streaming convolution engine.
///
/// All parameters are fixed per engine instance and validated on
/// construction; see [`Params::validate()`] for the exact rules. Pixels wider
/// than `data_width` and weights wider than `weight_width` are truncated to
/// their lane width on intake, the way a hardware register truncates an
/// over-wide write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Params {
    /// Side length of the (square) convolution kernel. Must be odd.
    pub kernel_size: usize,
    /// Step of the window anchor between consecutive output positions.
    pub stride: usize,
    /// Zero-padding applied around the image; `(kernel_size - 1) / 2`
    /// reproduces `SAME`-style borders.
    pub padding: usize,
    /// Number of input channels.
    pub in_channels: usize,
    /// Number of filters, i.e. output channels.
    pub num_filters: usize,
    /// Spatial width of an input frame.
    pub image_width: usize,
    /// Spatial height of an input frame.
    pub image_height: usize,
    /// Pixel width in bits. Pixels are always unsigned.
    pub data_width: u32,
    /// Weight width in bits.
    pub weight_width: u32,
    /// Signedness of the weight lane.
    pub weight_signedness: Signedness,
    /// Width of each output scalar in bits; sums are saturated into it.
    pub output_width: u32,
    /// Signedness of the output lane, determining the saturation bounds.
    pub output_signedness: Signedness,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            kernel_size: 3,
            stride: 1,
            padding: 1,
            in_channels: 1,
            num_filters: 1,
            image_width: 32,
            image_height: 32,
            data_width: 8,
            weight_width: 8,
            weight_signedness: Signedness::Signed,
            output_width: 32,
            output_signedness: Signedness::Signed,
        }
    }
}

impl Params {
    /// Checks the configuration for validity.
    ///
    /// The rules are:
    ///
    /// - `kernel_size` is odd and within `1..=31`;
    /// - the image is at least as large as the kernel in both dimensions;
    /// - `stride >= 1` and `padding <= 15`;
    /// - channel and filter counts are within `1..=4096`;
    /// - `data_width` and `weight_width` are within `1..=16` bits,
    ///   `output_width` within `1..=32` bits.
    ///
    /// The count and width caps guarantee that the 64-bit accumulator used
    /// by the MAC units cannot overflow for any valid configuration.
    pub fn validate(&self) -> Result<()> {
        if self.kernel_size % 2 == 0 {
            return Err(Error::EvenKernelSize(self.kernel_size));
        }
        if self.kernel_size > MAX_KERNEL_SIZE {
            return Err(Error::KernelTooLarge(self.kernel_size));
        }
        if self.image_width < self.kernel_size || self.image_height < self.kernel_size {
            return Err(Error::ImageTooSmall {
                width: self.image_width,
                height: self.image_height,
                kernel_size: self.kernel_size,
            });
        }
        if self.stride == 0 {
            return Err(Error::ZeroStride);
        }
        if self.padding > MAX_PADDING {
            return Err(Error::PaddingTooLarge(self.padding));
        }
        if self.in_channels == 0 || self.in_channels > MAX_CHANNELS {
            return Err(Error::ChannelCount(self.in_channels));
        }
        if self.num_filters == 0 || self.num_filters > MAX_FILTERS {
            return Err(Error::FilterCount(self.num_filters));
        }
        if self.data_width == 0 || self.data_width > MAX_DATA_WIDTH {
            return Err(Error::DataWidth(self.data_width));
        }
        if self.weight_width == 0 || self.weight_width > MAX_WEIGHT_WIDTH {
            return Err(Error::WeightWidth(self.weight_width));
        }
        if self.output_width == 0 || self.output_width > MAX_OUTPUT_WIDTH {
            return Err(Error::OutputWidth(self.output_width));
        }
        Ok(())
    }

    /// Number of output rows per frame: `ceil(image_height / stride)`.
    pub fn output_rows(&self) -> usize {
        (self.image_height + self.stride - 1) / self.stride
    }

    /// Number of output columns per frame: `ceil(image_width / stride)`.
    pub fn output_cols(&self) -> usize {
        (self.image_width + self.stride - 1) / self.stride
    }

    /// Total output positions per frame.
    pub fn output_positions(&self) -> usize {
        self.output_rows() * self.output_cols()
    }

    /// Window offset from its anchor: `kernel_size / 2` (floor).
    pub(crate) fn half_kernel(&self) -> usize {
        self.kernel_size / 2
    }

    /// Rows in a line-buffer ring.
    pub(crate) fn buffer_rows(&self) -> usize {
        self.kernel_size + 1
    }

    /// Length of one line-buffer row, including the padding columns.
    pub(crate) fn buffer_row_len(&self) -> usize {
        self.image_width + 2 * self.padding
    }

    /// Bit mask applied to every incoming pixel.
    pub(crate) fn data_mask(&self) -> u16 {
        ((1_u32 << self.data_width) - 1) as u16
    }
}

/// Errors reported by the engine.
///
/// Configuration problems surface when an engine is constructed; streaming
/// itself never fails (out-of-image reads resolve to zero padding,
/// overflowing sums saturate). The only post-construction error is
/// [`Self::StalledStream`], returned by the whole-frame driver when the
/// weight store never becomes ready.
#[derive(Debug, Error)]
pub enum Error {
    /// Kernel side length is even; such windows have no center pixel.
    #[error("kernel size must be odd, got {0}")]
    EvenKernelSize(usize),
    /// Kernel side length exceeds the supported maximum.
    #[error("kernel size must be within 1..=31, got {0}")]
    KernelTooLarge(usize),
    /// The image cannot fit a single kernel footprint.
    #[error("{width}x{height} image is smaller than the {kernel_size}x{kernel_size} kernel")]
    ImageTooSmall {
        /// Configured image width.
        width: usize,
        /// Configured image height.
        height: usize,
        /// Configured kernel side length.
        kernel_size: usize,
    },
    /// The window anchor would never advance.
    #[error("stride must be positive")]
    ZeroStride,
    /// Padding exceeds the supported maximum.
    #[error("padding must be within 0..=15, got {0}")]
    PaddingTooLarge(usize),
    /// Channel count is zero or exceeds the supported maximum.
    #[error("channel count must be within 1..=4096, got {0}")]
    ChannelCount(usize),
    /// Filter count is zero or exceeds the supported maximum.
    #[error("filter count must be within 1..=4096, got {0}")]
    FilterCount(usize),
    /// Pixel width is out of range.
    #[error("data width must be within 1..=16 bits, got {0}")]
    DataWidth(u32),
    /// Weight width is out of range.
    #[error("weight width must be within 1..=16 bits, got {0}")]
    WeightWidth(u32),
    /// Output width is out of range.
    #[error("output width must be within 1..=32 bits, got {0}")]
    OutputWidth(u32),
    /// The weight store never reported ready, so the frame could not be
    /// fully convolved.
    #[error("weight store never became ready; emitted {emitted} of {expected} output positions")]
    StalledStream {
        /// Output positions emitted before the stream stalled.
        emitted: usize,
        /// Output positions a full frame would produce.
        expected: usize,
    },
}
