// SPDX-License-Identifier: Apache-2.0
//! Elevation/biome noise buffer.
//!
//! The host generates one noise buffer per match and serializes it inside
//! MATCH_LOAD; clients never regenerate it locally. Map construction treats
//! the buffer as an opaque grid of signed bytes.

use crate::rng::Lcg;

/// A rectangular grid of signed noise samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Noise {
    /// Grid width in tiles.
    pub width: u32,
    /// Grid height in tiles.
    pub height: u32,
    /// Row-major samples, `width * height` of them.
    pub values: Vec<i8>,
}

impl Noise {
    /// A zeroed buffer; flat sand, no water, no highland.
    #[must_use]
    pub fn zeroed(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            values: vec![0; (width * height) as usize],
        }
    }

    /// Generate a buffer from an LCG: white noise smoothed by box passes so
    /// water and highland form contiguous patches.
    #[must_use]
    pub fn generate(width: u32, height: u32, lcg: &mut Lcg) -> Self {
        let w = width as usize;
        let h = height as usize;
        let mut values: Vec<i32> = Vec::with_capacity(w * h);
        for _ in 0..w * h {
            values.push(lcg.next_range(-127, 127));
        }

        for _ in 0..3 {
            let mut smoothed = vec![0i32; w * h];
            for y in 0..h {
                for x in 0..w {
                    let mut sum = 0i32;
                    let mut count = 0i32;
                    for dy in -1i32..=1 {
                        for dx in -1i32..=1 {
                            let nx = x as i32 + dx;
                            let ny = y as i32 + dy;
                            if nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h {
                                sum += values[ny as usize * w + nx as usize];
                                count += 1;
                            }
                        }
                    }
                    smoothed[y * w + x] = sum / count;
                }
            }
            values = smoothed;
        }

        // Stretch the smoothed field back toward the full sample range.
        let values = values
            .iter()
            .map(|v| (v * 3).clamp(-127, 127) as i8)
            .collect();
        Self {
            width,
            height,
            values,
        }
    }

    /// Sample at a tile coordinate.
    #[must_use]
    pub fn at(&self, x: u32, y: u32) -> i8 {
        self.values[(y * self.width + x) as usize]
    }
}
