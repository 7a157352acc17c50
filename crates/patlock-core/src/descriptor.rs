//! Keypoint orientation and 256-bit rotated binary descriptors.
//!
//! The orientation is the intensity-centroid angle over a disk of
//! half-radius 15. Descriptors are BRIEF-style intensity comparisons over a
//! fixed sampling pattern rotated by the keypoint angle, packed as 8
//! little-endian 32-bit words per row so Hamming matching can stride by 8.

use crate::detector::Keypoint;
use crate::image::ImageView;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Half-radius of the orientation disk.
const HALF_PATCH: isize = 15;

/// Per-row half-width of the orientation disk: index `v` gives the +-u bound
/// for row offset `v`.
const U_MAX: [isize; 16] = [15, 15, 15, 15, 14, 14, 14, 13, 13, 12, 11, 10, 9, 8, 6, 3];

/// Number of bits per descriptor.
pub const DESCRIPTOR_BITS: usize = 256;
/// 32-bit words per descriptor row.
pub const WORDS_PER_ROW: usize = DESCRIPTOR_BITS / 32;

/// Sampling-pattern coordinate bound; keeps rotated samples within the
/// orientation disk's reach.
const PATTERN_BOUND: i32 = 13;

/// Seed of the shared sampling pattern. Trainer and per-frame extraction
/// must agree bit-for-bit.
const PATTERN_SEED: u64 = 0x4f52_4250;

/// Intensity-centroid orientation at (x, y), in radians.
///
/// Out-of-bounds samples are clamped to the border; the detector's border
/// policy normally keeps the disk fully inside the image.
#[must_use]
pub fn intensity_centroid_angle(img: &ImageView<'_>, x: f32, y: f32) -> f32 {
    let cx = x.round() as isize;
    let cy = y.round() as isize;
    let mut m01 = 0i64;
    let mut m10 = 0i64;

    // Center row contributes to m10 only.
    for u in -HALF_PATCH..=HALF_PATCH {
        m10 += u as i64 * img.pixel_clamped(cx + u, cy) as i64;
    }

    // Symmetric row pairs.
    for v in 1..=HALF_PATCH {
        let d = U_MAX[v as usize];
        let mut v_sum = 0i64;
        for u in -d..=d {
            let above = img.pixel_clamped(cx + u, cy - v) as i64;
            let below = img.pixel_clamped(cx + u, cy + v) as i64;
            m10 += u as i64 * (above + below);
            v_sum += below - above;
        }
        m01 += v as i64 * v_sum;
    }

    (m01 as f32).atan2(m10 as f32)
}

/// A packed bank of descriptor rows, contiguous in memory.
#[derive(Clone, Debug, Default)]
pub struct DescriptorBank {
    words: Vec<u32>,
}

impl DescriptorBank {
    #[must_use]
    pub fn with_capacity(rows: usize) -> Self {
        Self { words: Vec::with_capacity(rows * WORDS_PER_ROW) }
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.words.len() / WORDS_PER_ROW
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn row(&self, i: usize) -> &[u32] {
        &self.words[i * WORDS_PER_ROW..(i + 1) * WORDS_PER_ROW]
    }

    pub fn push_row(&mut self, row: [u32; WORDS_PER_ROW]) {
        self.words.extend_from_slice(&row);
    }
}

/// Number of set bits in a 32-bit word.
///
/// One Hamming comparison is 8 of these over XORed descriptor words; the
/// compiler lowers it to a native popcount where available.
#[inline]
#[must_use]
pub fn popcount32(x: u32) -> u32 {
    x.count_ones()
}

/// Hamming distance between two descriptor rows.
#[inline]
#[must_use]
pub fn hamming_distance(a: &[u32], b: &[u32]) -> u32 {
    debug_assert_eq!(a.len(), WORDS_PER_ROW);
    debug_assert_eq!(b.len(), WORDS_PER_ROW);
    let mut dist = 0;
    for i in 0..WORDS_PER_ROW {
        dist += popcount32(a[i] ^ b[i]);
    }
    dist
}

/// Rotated-BRIEF extractor with a process-fixed sampling pattern.
pub struct DescriptorExtractor {
    /// 256 comparison pairs: (x1, y1, x2, y2) offsets from the keypoint.
    pattern: Vec<[i32; 4]>,
}

impl DescriptorExtractor {
    #[must_use]
    pub fn new() -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
        let mut pattern = Vec::with_capacity(DESCRIPTOR_BITS);
        for _ in 0..DESCRIPTOR_BITS {
            pattern.push([
                rng.gen_range(-PATTERN_BOUND..=PATTERN_BOUND),
                rng.gen_range(-PATTERN_BOUND..=PATTERN_BOUND),
                rng.gen_range(-PATTERN_BOUND..=PATTERN_BOUND),
                rng.gen_range(-PATTERN_BOUND..=PATTERN_BOUND),
            ]);
        }
        Self { pattern }
    }

    /// Compute orientations and descriptors for `keypoints` over the blurred
    /// level image. Row `i` of the bank corresponds to `keypoints[i]`.
    pub fn describe(
        &self,
        blurred: &ImageView<'_>,
        keypoints: &mut [Keypoint],
        bank: &mut DescriptorBank,
    ) {
        bank.clear();
        for kp in keypoints.iter_mut() {
            kp.angle = intensity_centroid_angle(blurred, kp.x, kp.y);
            bank.push_row(self.describe_one(blurred, kp));
        }
    }

    fn describe_one(&self, img: &ImageView<'_>, kp: &Keypoint) -> [u32; WORDS_PER_ROW] {
        let (sin, cos) = kp.angle.sin_cos();
        let cx = kp.x.round() as isize;
        let cy = kp.y.round() as isize;
        let w = img.width as isize;
        let h = img.height as isize;

        let mut words = [0u32; WORDS_PER_ROW];
        for (bit, pair) in self.pattern.iter().enumerate() {
            let r1 = rotate(pair[0], pair[1], sin, cos);
            let r2 = rotate(pair[2], pair[3], sin, cos);
            let (x1, y1) = (cx + r1.0, cy + r1.1);
            let (x2, y2) = (cx + r2.0, cy + r2.1);

            // A pair falling outside the level leaves the bit at zero.
            if x1 < 0 || x1 >= w || y1 < 0 || y1 >= h || x2 < 0 || x2 >= w || y2 < 0 || y2 >= h {
                continue;
            }
            let a = img.pixel(x1 as usize, y1 as usize);
            let b = img.pixel(x2 as usize, y2 as usize);
            if a < b {
                words[bit / 32] |= 1 << (bit % 32);
            }
        }
        words
    }
}

impl Default for DescriptorExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn rotate(px: i32, py: i32, sin: f32, cos: f32) -> (isize, isize) {
    let rx = (cos * px as f32 - sin * py as f32).round() as isize;
    let ry = (sin * px as f32 + cos * py as f32).round() as isize;
    (rx, ry)
}
