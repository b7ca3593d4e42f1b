//! Multi-threshold deblending of connected components.
//!
//! SExtractor-style approach:
//! 1. Re-threshold the component at exponentially spaced levels between its
//!    faintest pixel and its peak
//! 2. Track how regions split at higher levels
//! 3. A split is real when at least two branches carry `min_contrast` of the
//!    component flux and `min_area` pixels
//! 4. Pixels of the component are handed to the branch containing them, or
//!    to the nearest branch peak
//!
//! Reference: Bertin & Arnouts (1996), A&AS 117, 393

#[cfg(test)]
mod tests;

use smallvec::{SmallVec, smallvec};

use super::config::Connectivity;

/// Upper bound on objects produced from one component.
const MAX_OBJECTS: usize = 16;

/// Inline capacity for the object list; most components hold one or two stars.
pub type Objects = SmallVec<[Vec<usize>; 4]>;

/// Deblending parameters.
#[derive(Debug, Clone, Copy)]
pub struct DeblendParams {
    pub n_levels: usize,
    pub min_contrast: f32,
    pub min_area: usize,
    pub connectivity: Connectivity,
}

/// Split one component into objects.
///
/// `component` holds image pixel indices; `values` their background-subtracted
/// values in the same order. Every component pixel ends up in exactly one
/// returned object. Without a significant split the component is returned as
/// a single object.
pub fn deblend(
    component: &[usize],
    values: &[f32],
    width: usize,
    params: &DeblendParams,
) -> Objects {
    debug_assert_eq!(component.len(), values.len());

    let n = component.len();
    if params.n_levels < 2 || n < 2 * params.min_area.max(1) {
        return smallvec![component.to_vec()];
    }

    let low = values.iter().copied().fold(f32::INFINITY, f32::min);
    let peak = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !(low > 0.0 && peak > low) {
        return smallvec![component.to_vec()];
    }

    let total_flux: f32 = values.iter().sum();
    let min_flux = params.min_contrast * total_flux;
    let grid = LocalGrid::new(component, width);
    let mut scratch = vec![false; n];

    let mut active: Vec<Vec<u32>> = vec![(0..n as u32).collect()];
    let ratio = peak / low;

    for level in 1..params.n_levels {
        let threshold = low * ratio.powf(level as f32 / params.n_levels as f32);
        let mut next = Vec::with_capacity(active.len() + 1);

        for region in &active {
            let branches = grid.split(
                region,
                |i| values[i as usize] > threshold,
                params.connectivity,
                &mut scratch,
            );
            let significant: Vec<Vec<u32>> = branches
                .into_iter()
                .filter(|b| {
                    b.len() >= params.min_area
                        && b.iter().map(|&i| values[i as usize]).sum::<f32>() >= min_flux
                })
                .collect();

            if significant.len() >= 2 {
                next.extend(significant);
            } else {
                next.push(region.clone());
            }
        }

        if next.len() > MAX_OBJECTS {
            tracing::trace!("Deblend stopped at {} branches", next.len());
            break;
        }
        active = next;
    }

    if active.len() < 2 {
        return smallvec![component.to_vec()];
    }

    assign_to_branches(component, values, width, &active)
}

/// Give every pixel to the branch that contains it, the rest to the nearest
/// branch peak (lowest branch index on ties).
fn assign_to_branches(
    component: &[usize],
    values: &[f32],
    width: usize,
    branches: &[Vec<u32>],
) -> Objects {
    const UNASSIGNED: u32 = u32::MAX;

    let mut owner = vec![UNASSIGNED; component.len()];
    let mut peaks: SmallVec<[(f32, f32); 4]> = SmallVec::with_capacity(branches.len());

    for (b, branch) in branches.iter().enumerate() {
        let mut best = branch[0];
        for &i in branch {
            owner[i as usize] = b as u32;
            if values[i as usize] > values[best as usize] {
                best = i;
            }
        }
        let p = component[best as usize];
        peaks.push(((p % width) as f32, (p / width) as f32));
    }

    let mut objects: Objects = (0..branches.len()).map(|_| Vec::new()).collect();
    for (i, &p) in component.iter().enumerate() {
        let b = if owner[i] != UNASSIGNED {
            owner[i] as usize
        } else {
            let x = (p % width) as f32;
            let y = (p / width) as f32;
            peaks
                .iter()
                .enumerate()
                .map(|(b, &(px, py))| (b, (px - x).powi(2) + (py - y).powi(2)))
                .fold((0, f32::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
                .0
        };
        objects[b].push(p);
    }

    objects
}

// ============================================================================
// Local grid
// ============================================================================

const NO_SLOT: u32 = u32::MAX;

/// Maps bounding-box positions of a component to component-local indices.
#[derive(Debug)]
struct LocalGrid {
    width: usize,
    height: usize,
    slots: Vec<u32>,
    /// Bounding-box position per component-local index.
    positions: Vec<(usize, usize)>,
}

impl LocalGrid {
    fn new(component: &[usize], image_width: usize) -> Self {
        let mut x0 = usize::MAX;
        let mut y0 = usize::MAX;
        let mut x1 = 0usize;
        let mut y1 = 0usize;
        for &p in component {
            let (x, y) = (p % image_width, p / image_width);
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }

        let width = x1 - x0 + 1;
        let height = y1 - y0 + 1;
        let mut slots = vec![NO_SLOT; width * height];
        let positions = component
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let lx = p % image_width - x0;
                let ly = p / image_width - y0;
                slots[ly * width + lx] = i as u32;
                (lx, ly)
            })
            .collect();

        Self {
            width,
            height,
            slots,
            positions,
        }
    }

    /// Connected subsets of `region` whose members satisfy `keep`.
    ///
    /// `in_set` is scratch of component length and is left all `false`.
    fn split(
        &self,
        region: &[u32],
        keep: impl Fn(u32) -> bool,
        connectivity: Connectivity,
        in_set: &mut [bool],
    ) -> Vec<Vec<u32>> {
        for &i in region {
            in_set[i as usize] = keep(i);
        }

        let mut result = Vec::new();
        let mut queue = Vec::new();
        for &seed in region {
            if !in_set[seed as usize] {
                continue;
            }
            in_set[seed as usize] = false;
            queue.clear();
            queue.push(seed);
            let mut members = Vec::new();

            while let Some(i) = queue.pop() {
                members.push(i);
                let (lx, ly) = self.positions[i as usize];
                for &(dx, dy) in neighbor_offsets(connectivity) {
                    let nx = lx as isize + dx;
                    let ny = ly as isize + dy;
                    if nx < 0 || ny < 0 || nx >= self.width as isize || ny >= self.height as isize {
                        continue;
                    }
                    let slot = self.slots[ny as usize * self.width + nx as usize];
                    if slot != NO_SLOT && in_set[slot as usize] {
                        in_set[slot as usize] = false;
                        queue.push(slot);
                    }
                }
            }

            members.sort_unstable();
            result.push(members);
        }
        result
    }
}

fn neighbor_offsets(connectivity: Connectivity) -> &'static [(isize, isize)] {
    const FOUR: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
    const EIGHT: [(isize, isize); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];
    match connectivity {
        Connectivity::Four => &FOUR,
        Connectivity::Eight => &EIGHT,
    }
}
