//! Summed-area tables for Haar feature evaluation.

use image::GrayImage;

/// Upright, squared and (optionally) 45° tilted integral images of one
/// pyramid level. Each table has one extra leading row and column of zeros.
pub(crate) struct IntegralImages {
    stride: usize,
    sum: Vec<i64>,
    sqsum: Vec<i64>,
    tilted: Option<TiltedIntegral>,
}

impl IntegralImages {
    pub(crate) fn compute(image: &GrayImage, with_tilted: bool) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let pixels = image.as_raw();
        let stride = w + 1;
        let mut sum = vec![0i64; stride * (h + 1)];
        let mut sqsum = vec![0i64; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0i64;
            let mut row_sq = 0i64;
            for x in 0..w {
                let p = pixels[y * w + x] as i64;
                row_sum += p;
                row_sq += p * p;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row_sum;
                sqsum[i] = sqsum[i - stride] + row_sq;
            }
        }

        let tilted = with_tilted.then(|| TiltedIntegral::compute(pixels, w, h));
        Self {
            stride,
            sum,
            sqsum,
            tilted,
        }
    }

    /// Sum of the `w` × `h` block at `(x, y)`.
    pub(crate) fn rect_sum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        block(&self.sum, self.stride, x, y, w, h)
    }

    /// Sum of squares of the `w` × `h` block at `(x, y)`.
    pub(crate) fn rect_sqsum(&self, x: usize, y: usize, w: usize, h: usize) -> i64 {
        block(&self.sqsum, self.stride, x, y, w, h)
    }

    /// Sum of the 45° rotated rectangle with top corner `(x, y)`, extending
    /// `w` down-right and `h` down-left. Zero when no tilted table was built.
    pub(crate) fn tilted_sum(&self, x: i64, y: i64, w: i64, h: i64) -> i64 {
        let Some(t) = &self.tilted else {
            return 0;
        };
        t.at(x, y) - t.at(x - h, y + h) - t.at(x + w, y + w) + t.at(x + w - h, y + w + h)
    }
}

fn block(table: &[i64], stride: usize, x: usize, y: usize, w: usize, h: usize) -> i64 {
    let top = y * stride;
    let bottom = (y + h) * stride;
    table[bottom + x + w] - table[bottom + x] - table[top + x + w] + table[top + x]
}

/// Tilted summed-area table:
/// `T(X, Y) = Σ I(x, y)` over `y < Y` and `|x − X + 1| ≤ Y − y − 1`.
///
/// The triangles reach sideways past the image, so columns are padded by
/// `height + 1` on both sides; lookups beyond the padding are zero.
struct TiltedIntegral {
    pad: i64,
    width: i64,
    stride: usize,
    rows: i64,
    data: Vec<i64>,
}

impl TiltedIntegral {
    fn compute(pixels: &[u8], width: usize, height: usize) -> Self {
        let pad = height as i64 + 1;
        let w = width as i64;
        let stride = (w + 1 + 2 * pad) as usize;
        let mut t = Self {
            pad,
            width: w,
            stride,
            rows: height as i64 + 1,
            data: vec![0i64; stride * (height + 1)],
        };

        let pixel = |x: i64, y: i64| -> i64 {
            if x < 0 || y < 0 || x >= w || y >= height as i64 {
                0
            } else {
                pixels[y as usize * width + x as usize] as i64
            }
        };

        for y in 1..=height as i64 {
            for x in -pad..=(w + pad) {
                let v = t.at(x - 1, y - 1) + t.at(x + 1, y - 1) - t.at(x, y - 2)
                    + pixel(x - 1, y - 1)
                    + pixel(x - 1, y - 2);
                let i = y as usize * stride + (x + pad) as usize;
                t.data[i] = v;
            }
        }
        t
    }

    fn at(&self, x: i64, y: i64) -> i64 {
        if y < 0 || y >= self.rows || x < -self.pad || x > self.width + self.pad {
            return 0;
        }
        self.data[y as usize * self.stride + (x + self.pad) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| image::Luma([((x * 37 + y * 11 + x * y) % 251) as u8]))
    }

    #[test]
    fn test_rect_sum_matches_brute_force() {
        let img = sample_image(9, 7);
        let ii = IntegralImages::compute(&img, false);
        for (x, y, w, h) in [(0, 0, 9, 7), (2, 3, 4, 2), (8, 6, 1, 1), (1, 1, 0, 3)] {
            let mut expected = 0i64;
            let mut expected_sq = 0i64;
            for yy in y..y + h {
                for xx in x..x + w {
                    let p = img.get_pixel(xx as u32, yy as u32)[0] as i64;
                    expected += p;
                    expected_sq += p * p;
                }
            }
            assert_eq!(ii.rect_sum(x, y, w, h), expected);
            assert_eq!(ii.rect_sqsum(x, y, w, h), expected_sq);
        }
    }

    #[test]
    fn test_tilted_table_matches_definition() {
        let (w, h) = (7u32, 5u32);
        let img = sample_image(w, h);
        let t = TiltedIntegral::compute(img.as_raw(), w as usize, h as usize);

        for big_y in 0..=h as i64 {
            for big_x in 0..=w as i64 {
                let mut expected = 0i64;
                for y in 0..big_y {
                    for x in 0..w as i64 {
                        if (x - big_x + 1).abs() <= big_y - y - 1 {
                            expected += img.get_pixel(x as u32, y as u32)[0] as i64;
                        }
                    }
                }
                assert_eq!(t.at(big_x, big_y), expected, "T({big_x}, {big_y})");
            }
        }
    }

    #[test]
    fn test_tilted_sum_without_table_is_zero() {
        let ii = IntegralImages::compute(&sample_image(4, 4), false);
        assert_eq!(ii.tilted_sum(2, 0, 1, 1), 0);
    }

    #[test]
    fn test_tilted_rect_area_is_twice_upright() {
        // On an all-ones image the sum is the pixel count: 2 * w * h.
        let img = GrayImage::from_pixel(8, 8, image::Luma([1]));
        let ii = IntegralImages::compute(&img, true);
        assert_eq!(ii.tilted_sum(3, 1, 2, 2), 8);
    }
}
