use image::{GrayImage, Luma};
use stereo_recon_disparity::{
    BlockMatchParams, BlockMatchSad, DisparityEngine, DisparityError, SemiGlobalMatcher, SgmMode,
    SgmParams,
};

const SHIFT: u32 = 6;

fn texture(width: u32, height: u32, seed: u64) -> Vec<u8> {
    let mut state = seed;
    (0..width * height)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 56) as u8
        })
        .collect()
}

/// Random texture seen with a constant disparity of `SHIFT` pixels.
fn stereo_pair(width: u32, height: u32) -> (GrayImage, GrayImage) {
    let tex = texture(width + SHIFT, height, 0x9e37_79b9_7f4a_7c15);
    let at = |x: u32, y: u32| tex[(y * (width + SHIFT) + x) as usize];
    let left = GrayImage::from_fn(width, height, |x, y| Luma([at(x, y)]));
    let right = GrayImage::from_fn(width, height, |x, y| Luma([at(x + SHIFT, y)]));
    (left, right)
}

fn sgm_params() -> SgmParams {
    SgmParams {
        min_disparity: 0,
        num_disparities: 16,
        block_size: 5,
        mode: SgmMode::Full,
        ..SgmParams::default()
    }
}

#[test]
fn sgm_recovers_constant_shift() {
    let (left, right) = stereo_pair(160, 60);
    let map = SemiGlobalMatcher::new(sgm_params()).compute(&left, &right).unwrap();

    let mut total = 0;
    let mut close = 0;
    for y in 5..55 {
        for x in 24..150 {
            total += 1;
            if (map.get(x, y) - SHIFT as f32).abs() <= 0.5 {
                close += 1;
            }
        }
    }
    assert!(close * 10 >= total * 9, "{close}/{total} pixels near the true shift");
}

#[test]
fn sgm_marks_unsearchable_columns_with_sentinel() {
    let (left, right) = stereo_pair(96, 20);
    let params = sgm_params();
    let map = SemiGlobalMatcher::new(params).compute(&left, &right).unwrap();
    // columns left of the full search range cannot be matched
    for y in 0..20 {
        for x in 0..16 {
            assert_eq!(params.invalid_value(), map.get(x, y));
        }
    }
    assert_eq!(Some(-1.0), map.min_value());
}

#[test]
fn every_sgm_mode_runs() {
    let (left, right) = stereo_pair(80, 24);
    for mode in [SgmMode::Sgbm, SgmMode::Full, SgmMode::ThreeWay] {
        let params = SgmParams { mode, ..sgm_params() };
        let map = SemiGlobalMatcher::new(params).compute(&left, &right).unwrap();
        let hits = map.data.iter().filter(|&&d| (d - SHIFT as f32).abs() <= 0.5).count();
        assert!(hits > map.len() / 2, "{mode:?}: {hits} hits");
    }
}

#[test]
fn block_matching_is_exact_on_texture() {
    let (left, right) = stereo_pair(64, 32);
    let matcher = BlockMatchSad::new(BlockMatchParams {
        block_size: 5,
        search_block_size: 10,
    });
    let map = matcher.compute(&left, &right).unwrap();
    // the first searchable column whose true match lies inside the image is 6
    for y in 5..27 {
        for x in 6..59 {
            assert_eq!(SHIFT as f32, map.get(x, y), "({x}, {y})");
        }
    }
}

#[test]
fn block_matching_is_deterministic() {
    let (left, right) = stereo_pair(70, 30);
    let matcher = BlockMatchSad::default();
    let a = matcher.compute(&left, &right).unwrap();
    let b = matcher.compute(&left, &right).unwrap();
    assert_eq!(a, b);
}

#[test]
fn mismatched_sizes_fail_before_matching() {
    let left = GrayImage::new(40, 30);
    let right = GrayImage::new(41, 30);
    let expected = DisparityError::ImageDimensionMismatch {
        left_width: 40,
        left_height: 30,
        right_width: 41,
        right_height: 30,
    };
    assert_eq!(Err(expected.clone()), BlockMatchSad::default().compute(&left, &right));
    assert_eq!(Err(expected), SemiGlobalMatcher::default().compute(&left, &right));
}
