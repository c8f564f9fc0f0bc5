//! Tests for the streaming surface of the engine: event counts and ordering,
//! stride geometry, and the readiness barriers that gate emission.

use ndarray::{Array1, Array2, Array3, Array4, Axis};
use rand::{thread_rng, Rng};

use stream_convolution::{
    ConvEngine, Error, Params, WeightBank, WeightStore, WindowGenerator,
};

fn random_image(channels: usize, height: usize, width: usize) -> Array3<u16> {
    let mut rng = thread_rng();
    Array3::from_shape_fn([channels, height, width], |_| rng.gen_range(0..256))
}

fn random_filters(filters: usize, kernel_size: usize, channels: usize) -> Array4<i32> {
    let mut rng = thread_rng();
    Array4::from_shape_fn([filters, kernel_size, kernel_size, channels], |_| {
        rng.gen_range(-128..128)
    })
}

/// Streams `image` into the engine pixel by pixel, then drains it with empty
/// ticks until it reports completion or `drain_budget` runs out.
fn drive_frame<S: WeightStore>(
    engine: &mut ConvEngine<S>,
    image: &Array3<u16>,
    drain_budget: usize,
) -> Vec<Array1<i64>> {
    let (channels, height, width) = (image.shape()[0], image.shape()[1], image.shape()[2]);
    engine.start_frame();

    let mut events = vec![];
    let mut slab = vec![0_u16; channels];
    for y in 0..height {
        for x in 0..width {
            for (channel, pixel) in slab.iter_mut().enumerate() {
                *pixel = image[[channel, y, x]];
            }
            events.extend(engine.step(Some(&slab)));
        }
    }
    for _ in 0..drain_budget {
        if engine.is_done() {
            break;
        }
        events.extend(engine.step(None));
    }
    events
}

#[test]
fn event_count_follows_stride_geometry() {
    const SHAPES: &[(usize, usize, usize)] = &[
        (5, 5, 1),
        (5, 5, 2),
        (5, 5, 3),
        (5, 5, 5),
        (7, 5, 2),
        (5, 7, 2),
        (8, 8, 3),
        (9, 4, 4),
    ];

    for &(width, height, stride) in SHAPES {
        let params = Params {
            image_width: width,
            image_height: height,
            stride,
            ..Params::default()
        };
        let expected = ((height + stride - 1) / stride) * ((width + stride - 1) / stride);
        assert_eq!(params.output_positions(), expected);

        let image = random_image(1, height, width);
        let filters = random_filters(1, 3, 1);
        let mut engine = ConvEngine::with_filters(params, &filters).unwrap();
        let events = drive_frame(&mut engine, &image, width * height);

        assert!(engine.is_done());
        assert_eq!(
            events.len(),
            expected,
            "one event per anchored position for {}x{} / stride {}",
            width,
            height,
            stride
        );
    }
}

#[test]
fn strided_output_subsamples_the_dense_grid() {
    let image = random_image(2, 7, 7);
    let filters = random_filters(2, 3, 2);

    let dense_params = Params {
        image_width: 7,
        image_height: 7,
        in_channels: 2,
        num_filters: 2,
        ..Params::default()
    };
    let strided_params = Params {
        stride: 2,
        ..dense_params
    };

    let mut engine = ConvEngine::with_filters(dense_params, &filters).unwrap();
    let dense = engine.compute(&image).unwrap();
    let mut engine = ConvEngine::with_filters(strided_params, &filters).unwrap();
    let strided = engine.compute(&image).unwrap();

    assert_eq!(strided.shape(), [2, 4, 4]);
    for filter in 0..2 {
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(strided[[filter, y, x]], dense[[filter, 2 * y, 2 * x]]);
            }
        }
    }
}

#[test]
fn unit_kernel_scales_the_image() {
    let params = Params {
        kernel_size: 1,
        padding: 0,
        image_width: 6,
        image_height: 4,
        ..Params::default()
    };
    let image = random_image(1, 4, 6);
    let filters = Array4::from_elem([1, 1, 1, 1], 3);

    let mut engine = ConvEngine::with_filters(params, &filters).unwrap();
    let output = engine.compute(&image).unwrap();

    assert_eq!(output.shape(), [1, 4, 6]);
    let scaled = image.mapv(|pixel| 3 * i64::from(pixel));
    assert_eq!(output.index_axis(Axis(0), 0), scaled.index_axis(Axis(0), 0));
}

#[test]
fn permuting_channels_together_with_filters_is_a_no_op() {
    const PERMUTATION: &[usize] = &[2, 0, 1];

    let image = random_image(3, 6, 6);
    let filters = random_filters(2, 3, 3);
    let params = Params {
        in_channels: 3,
        num_filters: 2,
        image_width: 6,
        image_height: 6,
        ..Params::default()
    };

    let mut engine = ConvEngine::with_filters(params, &filters).unwrap();
    let expected = engine.compute(&image).unwrap();

    let shuffled_image = image.select(Axis(0), PERMUTATION);
    let shuffled_filters = filters.select(Axis(3), PERMUTATION);
    let mut engine = ConvEngine::with_filters(params, &shuffled_filters).unwrap();
    let output = engine.compute(&shuffled_image).unwrap();

    assert_eq!(output, expected);
}

#[test]
fn barrier_holds_until_every_generator_is_ready() {
    let params = Params {
        image_width: 5,
        image_height: 5,
        ..Params::default()
    };
    let mut left = WindowGenerator::new(params);
    let mut right = WindowGenerator::new(params);
    left.start_frame();
    right.start_frame();

    // Seven pixels cover the first padded window; leave `right` one short.
    for pixel in 1..=7 {
        left.push_pixel(pixel);
    }
    for pixel in 1..=6 {
        right.push_pixel(pixel);
    }
    assert!(left.window_ready());
    assert!(!right.window_ready());
    assert!(![&left, &right].iter().all(|gen| gen.window_ready()));

    right.push_pixel(7);
    assert!([&left, &right].iter().all(|gen| gen.window_ready()));
}

#[test]
#[should_panic(expected = "Pixel slab length must agree")]
fn step_rejects_misframed_slabs() {
    let params = Params {
        in_channels: 2,
        image_width: 5,
        image_height: 5,
        ..Params::default()
    };
    let filters = Array4::from_elem([1, 3, 3, 2], 1);
    let mut engine = ConvEngine::with_filters(params, &filters).unwrap();
    engine.start_frame();
    engine.step(Some(&[1]));
}

#[test]
fn pixels_before_the_frame_starts_are_discarded() {
    let params = Params {
        image_width: 5,
        image_height: 5,
        ..Params::default()
    };
    let image = random_image(1, 5, 5);
    let filters = random_filters(1, 3, 1);
    let mut engine = ConvEngine::with_filters(params, &filters).unwrap();

    for _ in 0..4 {
        assert!(engine.step(Some(&[99])).is_none());
    }
    assert!(!engine.is_done());

    let events = drive_frame(&mut engine, &image, 25);
    assert_eq!(events.len(), 25);
    assert!(engine.is_done());
}

/// Store whose weights never arrive.
#[derive(Debug)]
struct NeverReadyStore;

impl WeightStore for NeverReadyStore {
    fn fetch(&mut self, _filter: usize, _channel: usize) -> Option<Array2<i32>> {
        None
    }
}

/// Store that starts answering only after a fixed number of fetch attempts.
#[derive(Debug)]
struct DelayedStore {
    bank: WeightBank,
    delay: usize,
    polls: usize,
}

impl DelayedStore {
    fn new(filters: &Array4<i32>, delay: usize) -> Self {
        Self {
            bank: WeightBank::new(filters),
            delay,
            polls: 0,
        }
    }
}

impl WeightStore for DelayedStore {
    fn fetch(&mut self, filter: usize, channel: usize) -> Option<Array2<i32>> {
        self.polls += 1;
        if self.polls > self.delay {
            self.bank.fetch(filter, channel)
        } else {
            None
        }
    }
}

#[test]
fn absent_weights_hold_all_output() {
    let params = Params {
        image_width: 5,
        image_height: 5,
        ..Params::default()
    };
    let image = random_image(1, 5, 5);

    let mut engine = ConvEngine::new(params, NeverReadyStore).unwrap();
    let events = drive_frame(&mut engine, &image, 30);
    assert!(events.is_empty());
    assert!(!engine.is_done());
    assert!(!engine.weights_loaded());

    match engine.compute(&image) {
        Err(Error::StalledStream { emitted, expected }) => {
            assert_eq!(emitted, 0);
            assert_eq!(expected, 25);
        }
        other => panic!("Unexpected compute outcome: {:?}", other),
    }
}

#[test]
fn briefly_delayed_weights_lose_nothing() {
    let params = Params {
        image_width: 5,
        image_height: 5,
        ..Params::default()
    };
    let image = random_image(1, 5, 5);
    let filters = random_filters(1, 3, 1);

    let mut engine = ConvEngine::with_filters(params, &filters).unwrap();
    let expected = engine.compute(&image).unwrap();

    // One pending pair means one fetch per tick; the cache fills on tick 11,
    // well before the first window's rows are recycled on tick 21.
    let mut engine = ConvEngine::new(params, DelayedStore::new(&filters, 10)).unwrap();
    let output = engine.compute(&image).unwrap();
    assert_eq!(output, expected);
}

#[test]
fn badly_delayed_weights_drop_leading_windows() {
    let params = Params {
        image_width: 5,
        image_height: 5,
        ..Params::default()
    };
    let image = random_image(1, 5, 5);
    let filters = random_filters(1, 3, 1);

    let mut engine = ConvEngine::with_filters(params, &filters).unwrap();
    let reference = engine.compute(&image).unwrap();

    // The cache fills only after the whole 25-pixel stream has passed. By
    // then rows 0 and 1 have been recycled, which ruins the 10 windows
    // anchored on them; the 15 windows on rows 2..=4 survive in the buffer.
    let mut engine = ConvEngine::new(params, DelayedStore::new(&filters, 30)).unwrap();
    let events = drive_frame(&mut engine, &image, 50);
    assert!(engine.is_done());
    assert_eq!(events.len(), 15);

    let mut engine = ConvEngine::new(params, DelayedStore::new(&filters, 30)).unwrap();
    let output = engine.compute(&image).unwrap();
    for y in 0..2 {
        for x in 0..5 {
            assert_eq!(output[[0, y, x]], 0, "dropped window at ({}, {})", y, x);
        }
    }
    for y in 2..5 {
        for x in 0..5 {
            assert_eq!(output[[0, y, x]], reference[[0, y, x]]);
        }
    }
}
