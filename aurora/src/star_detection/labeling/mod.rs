//! Thresholding and connected component labeling using union-find.
//!
//! Rows are labeled strictly top to bottom, so scanning the frame in one pass
//! or in several row chunks produces identical labels. The async detector
//! relies on this to yield between chunks.


use arrayvec::ArrayVec;
use rayon::prelude::*;

use super::background::BackgroundMap;
use super::config::Connectivity;
use crate::common::Buffer2;

/// Label value for pixels below threshold.
pub const NO_LABEL: u32 = 0;

/// True when a pixel exceeds `background + k * noise`. Non-finite pixels never pass.
#[inline]
pub fn is_above_threshold(
    pixels: &Buffer2<f32>,
    background: &BackgroundMap,
    sigma_threshold: f32,
    idx: usize,
) -> bool {
    let v = pixels[idx];
    v.is_finite() && v > background.background(idx) + sigma_threshold * background.noise(idx)
}

// ============================================================================
// Union-find
// ============================================================================

#[derive(Debug, Default)]
struct UnionFind {
    parents: Vec<u32>,
}

impl UnionFind {
    fn new() -> Self {
        // Slot 0 is NO_LABEL
        Self { parents: vec![0] }
    }

    fn make_set(&mut self) -> u32 {
        let label = self.parents.len() as u32;
        self.parents.push(label);
        label
    }

    fn find(&mut self, mut label: u32) -> u32 {
        while self.parents[label as usize] != label {
            let grandparent = self.parents[self.parents[label as usize] as usize];
            self.parents[label as usize] = grandparent;
            label = grandparent;
        }
        label
    }

    /// Merge two sets; the smaller root wins so results do not depend on call order.
    fn union(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find(a);
        let rb = self.find(b);
        let (keep, drop) = if ra <= rb { (ra, rb) } else { (rb, ra) };
        self.parents[drop as usize] = keep;
        keep
    }
}

// ============================================================================
// Incremental scanner
// ============================================================================

/// Thresholds and labels a frame row by row.
#[derive(Debug)]
pub struct LabelScanner<'a> {
    pixels: &'a Buffer2<f32>,
    background: &'a BackgroundMap,
    sigma_threshold: f32,
    connectivity: Connectivity,
    labels: Vec<u32>,
    union_find: UnionFind,
    mask: Vec<bool>,
    next_row: usize,
}

impl<'a> LabelScanner<'a> {
    pub fn new(
        pixels: &'a Buffer2<f32>,
        background: &'a BackgroundMap,
        sigma_threshold: f32,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            pixels,
            background,
            sigma_threshold,
            connectivity,
            labels: vec![NO_LABEL; pixels.len()],
            union_find: UnionFind::new(),
            mask: Vec::new(),
            next_row: 0,
        }
    }

    #[inline]
    pub fn rows_done(&self) -> usize {
        self.next_row
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.next_row >= self.pixels.height()
    }

    /// Label up to `rows` further rows. Returns the number of rows processed.
    pub fn scan_rows(&mut self, rows: usize) -> usize {
        let width = self.pixels.width();
        let start = self.next_row;
        let end = start.saturating_add(rows).min(self.pixels.height());
        if start >= end || width == 0 {
            self.next_row = end;
            return end - start;
        }

        // Threshold the chunk in parallel, then label sequentially
        self.mask.clear();
        self.mask.resize((end - start) * width, false);
        let pixels = self.pixels;
        let background = self.background;
        let k = self.sigma_threshold;
        self.mask
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(row, mask_row)| {
                let base = (start + row) * width;
                for (x, m) in mask_row.iter_mut().enumerate() {
                    *m = is_above_threshold(pixels, background, k, base + x);
                }
            });

        for y in start..end {
            self.label_row(y, start);
        }
        self.next_row = end;
        end - start
    }

    /// Label the rest of the frame.
    pub fn scan_all(&mut self) {
        let remaining = self.pixels.height().saturating_sub(self.next_row);
        self.scan_rows(remaining);
    }

    fn label_row(&mut self, y: usize, chunk_start: usize) {
        let width = self.pixels.width();
        let mask_base = (y - chunk_start) * width;
        let base = y * width;

        for x in 0..width {
            if !self.mask[mask_base + x] {
                continue;
            }

            let mut neighbors: ArrayVec<u32, 4> = ArrayVec::new();
            if x > 0 {
                neighbors.push(self.labels[base + x - 1]);
            }
            if y > 0 {
                let up = base - width + x;
                neighbors.push(self.labels[up]);
                if self.connectivity == Connectivity::Eight {
                    if x > 0 {
                        neighbors.push(self.labels[up - 1]);
                    }
                    if x + 1 < width {
                        neighbors.push(self.labels[up + 1]);
                    }
                }
            }

            let mut label = NO_LABEL;
            for &n in neighbors.iter().filter(|&&n| n != NO_LABEL) {
                label = if label == NO_LABEL {
                    n
                } else {
                    self.union_find.union(label, n)
                };
            }
            if label == NO_LABEL {
                label = self.union_find.make_set();
            }
            self.labels[base + x] = label;
        }
    }

    /// Resolve provisional labels into compact ids numbered in row-major
    /// order of first appearance.
    pub fn finish(mut self) -> LabelMap {
        debug_assert!(self.is_done(), "finish called before all rows were scanned");

        let mut compact = vec![NO_LABEL; self.union_find.parents.len()];
        let mut num_labels = 0u32;
        for label in self.labels.iter_mut() {
            if *label == NO_LABEL {
                continue;
            }
            let root = self.union_find.find(*label) as usize;
            if compact[root] == NO_LABEL {
                num_labels += 1;
                compact[root] = num_labels;
            }
            *label = compact[root];
        }

        LabelMap {
            labels: Buffer2::new(self.pixels.width(), self.pixels.height(), self.labels),
            num_labels: num_labels as usize,
        }
    }
}

// ============================================================================
// Label map
// ============================================================================

/// Final component labels; 0 is background, components are `1..=num_labels`.
#[derive(Debug, Clone)]
pub struct LabelMap {
    labels: Buffer2<u32>,
    num_labels: usize,
}

impl LabelMap {
    #[inline]
    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    #[inline]
    pub fn labels(&self) -> &Buffer2<u32> {
        &self.labels
    }

    /// Pixel indices per component, in row-major order. Entry `i` holds label `i + 1`.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut components = vec![Vec::new(); self.num_labels];
        for (idx, &label) in self.labels.pixels().iter().enumerate() {
            if label != NO_LABEL {
                components[label as usize - 1].push(idx);
            }
        }
        components
    }
}
