//! Grayscale planes and the per-pixel primitives of the pipeline.
//!
//! All stages operate on dense 8-bit grayscale. [`ImageView`] is a borrowed,
//! stride-aware view for zero-copy ingestion; [`GrayImage`] is an owned plane
//! that is reused across frames and reallocated lazily when dimensions
//! change.

use crate::error::{TrackError, TrackResult};
use multiversion::multiversion;

/// Borrowed grayscale plane. `stride` is the byte distance between row
/// starts, so padded embedder buffers can be consumed without copying.
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub width: usize,
    pub height: usize,
    pub stride: usize,
}

impl<'a> ImageView<'a> {
    /// Wrap an embedder buffer, failing fast on geometry the pipeline
    /// cannot process: empty planes, a stride narrower than a row, or a
    /// buffer that ends before the last row does.
    pub fn new(data: &'a [u8], width: usize, height: usize, stride: usize) -> TrackResult<Self> {
        if width == 0 || height == 0 {
            return Err(TrackError::InvalidFrameSize { width, height });
        }
        if stride < width {
            return Err(TrackError::InvalidStride { stride, width });
        }
        // The final row needs only `width` bytes, not a full stride.
        let min_len = stride * (height - 1) + width;
        if data.len() < min_len {
            return Err(TrackError::BufferSizeMismatch {
                expected_len: min_len,
                actual_len: data.len(),
            });
        }
        Ok(Self { data, width, height, stride })
    }

    /// The `width` payload bytes of row `y`, stride padding excluded.
    #[inline(always)]
    pub fn row(&self, y: usize) -> &[u8] {
        debug_assert!(y < self.height);
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    #[inline(always)]
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        debug_assert!(x < self.width && y < self.height);
        self.data[y * self.stride + x]
    }

    /// Pixel accessor clamping out-of-range coordinates to the border.
    #[inline(always)]
    pub fn pixel_clamped(&self, x: isize, y: isize) -> u8 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.pixel(cx, cy)
    }

    /// Bilinear sample at a sub-pixel location, clamped at the borders.
    #[inline]
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x0 = x.floor() as isize;
        let y0 = y.floor() as isize;
        let fx = x - x.floor();
        let fy = y - y.floor();

        let p00 = self.pixel_clamped(x0, y0) as f32;
        let p10 = self.pixel_clamped(x0 + 1, y0) as f32;
        let p01 = self.pixel_clamped(x0, y0 + 1) as f32;
        let p11 = self.pixel_clamped(x0 + 1, y0 + 1) as f32;

        let top = p00 * (1.0 - fx) + p10 * fx;
        let bottom = p01 * (1.0 - fx) + p11 * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// An owned dense grayscale plane.
#[derive(Clone, Debug, Default)]
pub struct GrayImage {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl GrayImage {
    /// Create a zero-filled plane.
    #[must_use]
    pub fn new(width: usize, height: usize) -> Self {
        Self { data: vec![0; width * height], width, height }
    }

    /// Resize the plane, reallocating only when the pixel count grows.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.data.resize(width * height, 0);
        self.width = width;
        self.height = height;
    }

    /// Borrow as a packed [`ImageView`].
    #[must_use]
    pub fn as_view(&self) -> ImageView<'_> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }

    #[inline(always)]
    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// Convert an RGBA buffer to luma using the standard BT.601 weights.
///
/// The output plane is resized to `width` x `height` if needed. Rows are
/// converted in parallel; the result is identical to the serial order.
pub fn rgba_to_gray(rgba: &[u8], width: usize, height: usize, dst: &mut GrayImage) -> TrackResult<()> {
    if width == 0 || height == 0 {
        return Err(TrackError::InvalidFrameSize { width, height });
    }
    if rgba.len() < width * height * 4 {
        return Err(TrackError::BufferSizeMismatch {
            expected_len: width * height * 4,
            actual_len: rgba.len(),
        });
    }
    dst.resize(width, height);

    use rayon::prelude::*;

    dst.data
        .par_chunks_exact_mut(width)
        .zip(rgba.par_chunks_exact(width * 4))
        .for_each(|(gray_row, rgba_row)| {
            gray_row_kernel(rgba_row, gray_row);
        });
    Ok(())
}

#[multiversion(targets = "simd")]
fn gray_row_kernel(rgba_row: &[u8], gray_row: &mut [u8]) {
    for (px, g) in rgba_row.chunks_exact(4).zip(gray_row.iter_mut()) {
        // Fixed-point BT.601: (77 R + 150 G + 29 B) >> 8
        let y = 77 * px[0] as u32 + 150 * px[1] as u32 + 29 * px[2] as u32;
        *g = (y >> 8) as u8;
    }
}

/// Separable Gaussian blur with an odd kernel size in 3..=9.
///
/// Out-of-range sizes are clamped; even sizes are rounded up. The border is
/// handled by clamping sample coordinates.
pub fn gaussian_blur(src: &ImageView<'_>, dst: &mut GrayImage, kernel_size: usize) {
    let ksize = kernel_size.clamp(3, 9) | 1;
    let radius = (ksize / 2) as isize;
    let kernel = gaussian_kernel(ksize);

    dst.resize(src.width, src.height);
    let w = src.width;
    let h = src.height;
    let mut tmp = vec![0.0f32; w * h];

    use rayon::prelude::*;

    // Horizontal pass
    tmp.par_chunks_exact_mut(w).enumerate().for_each(|(y, tmp_row)| {
        let src_row = src.row(y);
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &coeff) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - radius).clamp(0, w as isize - 1) as usize;
                acc += src_row[sx] as f32 * coeff;
            }
            tmp_row[x] = acc;
        }
    });

    // Vertical pass
    dst.data.par_chunks_exact_mut(w).enumerate().for_each(|(y, dst_row)| {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &coeff) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - radius).clamp(0, h as isize - 1) as usize;
                acc += tmp[sy * w + x] * coeff;
            }
            dst_row[x] = (acc + 0.5).clamp(0.0, 255.0) as u8;
        }
    });
}

fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    // OpenCV's sigma-from-size convention keeps blur strength proportional
    // to the kernel footprint.
    let sigma = 0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = (ksize / 2) as isize;
    let mut kernel = Vec::with_capacity(ksize);
    let mut sum = 0.0f32;
    for k in -radius..=radius {
        let v = (-(k as f32 * k as f32) / (2.0 * sigma * sigma)).exp();
        kernel.push(v);
        sum += v;
    }
    for v in &mut kernel {
        *v /= sum;
    }
    kernel
}

/// Area-averaging downscale to an arbitrary smaller size.
///
/// If the source dimensions already equal the target the source is copied
/// verbatim, bit-identically. Upscaling is not supported; callers clamp
/// their scale factors to <= 1.
pub fn resample(src: &ImageView<'_>, dst: &mut GrayImage, new_width: usize, new_height: usize) {
    debug_assert!(new_width <= src.width && new_height <= src.height);
    dst.resize(new_width, new_height);

    if new_width == src.width && new_height == src.height {
        for y in 0..src.height {
            dst.data[y * new_width..(y + 1) * new_width].copy_from_slice(src.row(y));
        }
        return;
    }

    let x_ratio = src.width as f32 / new_width as f32;
    let y_ratio = src.height as f32 / new_height as f32;

    for dy in 0..new_height {
        let sy0 = (dy as f32 * y_ratio) as usize;
        let sy1 = (((dy + 1) as f32 * y_ratio).ceil() as usize).min(src.height).max(sy0 + 1);
        for dx in 0..new_width {
            let sx0 = (dx as f32 * x_ratio) as usize;
            let sx1 = (((dx + 1) as f32 * x_ratio).ceil() as usize).min(src.width).max(sx0 + 1);
            let mut acc = 0u32;
            for sy in sy0..sy1 {
                let row = src.row(sy);
                for &p in &row[sx0..sx1] {
                    acc += p as u32;
                }
            }
            let count = ((sy1 - sy0) * (sx1 - sx0)) as u32;
            dst.data[dy * new_width + dx] = (acc / count) as u8;
        }
    }
}

/// 2x downsample with a 2x2 average. Output dims are floor(w/2) x floor(h/2).
pub fn pyrdown(src: &ImageView<'_>, dst: &mut GrayImage) {
    let nw = src.width / 2;
    let nh = src.height / 2;
    dst.resize(nw, nh);

    for y in 0..nh {
        let r0 = src.row(y * 2);
        let r1 = src.row(y * 2 + 1);
        let dst_row = &mut dst.data[y * nw..(y + 1) * nw];
        for (x, d) in dst_row.iter_mut().enumerate() {
            let sx = x * 2;
            let sum = r0[sx] as u32 + r0[sx + 1] as u32 + r1[sx] as u32 + r1[sx + 1] as u32;
            *d = ((sum + 2) / 4) as u8;
        }
    }
}
