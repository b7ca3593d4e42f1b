use super::*;
use crate::testing::{SyntheticStar, render_stars};

const WIDTH: usize = 40;
const HEIGHT: usize = 20;

fn params() -> DeblendParams {
    DeblendParams {
        n_levels: 32,
        min_contrast: 0.005,
        min_area: 3,
        connectivity: Connectivity::Eight,
    }
}

/// Pixels above `threshold` with their values.
fn component_above(pixels: &[f32], threshold: f32) -> (Vec<usize>, Vec<f32>) {
    pixels
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v > threshold)
        .map(|(i, &v)| (i, v))
        .unzip()
}

fn object_containing(objects: &Objects, idx: usize) -> usize {
    objects
        .iter()
        .position(|o| o.contains(&idx))
        .expect("pixel must be assigned")
}

#[test]
fn test_two_unequal_stars_are_separated() {
    let pixels = render_stars(
        WIDTH,
        HEIGHT,
        0.0,
        &[
            SyntheticStar::new(14.0, 10.0, 100.0, 2.0),
            SyntheticStar::new(22.0, 10.0, 40.0, 2.0),
        ],
    );
    let (component, values) = component_above(&pixels, 2.0);
    let objects = deblend(&component, &values, WIDTH, &params());

    assert_eq!(objects.len(), 2);
    let a = object_containing(&objects, 10 * WIDTH + 14);
    let b = object_containing(&objects, 10 * WIDTH + 22);
    assert_ne!(a, b);

    // Every pixel assigned exactly once
    let total: usize = objects.iter().map(Vec::len).sum();
    assert_eq!(total, component.len());

    let flux = |o: &Vec<usize>| o.iter().map(|&i| pixels[i]).sum::<f32>();
    assert!(flux(&objects[a]) > flux(&objects[b]));
}

#[test]
fn test_single_star_is_not_split() {
    let pixels = render_stars(
        WIDTH,
        HEIGHT,
        0.0,
        &[SyntheticStar::new(20.3, 9.7, 80.0, 1.8)],
    );
    let (component, values) = component_above(&pixels, 1.0);
    let objects = deblend(&component, &values, WIDTH, &params());
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0], component);
}

#[test]
fn test_faint_companion_below_contrast_is_merged() {
    let pixels = render_stars(
        WIDTH,
        HEIGHT,
        0.0,
        &[
            SyntheticStar::new(14.0, 10.0, 100.0, 2.0),
            SyntheticStar::new(20.0, 10.0, 3.0, 1.0),
        ],
    );
    let (component, values) = component_above(&pixels, 0.5);
    let strict = DeblendParams {
        min_contrast: 0.2,
        ..params()
    };
    assert_eq!(deblend(&component, &values, WIDTH, &strict).len(), 1);
}

#[test]
fn test_disabled_levels_return_component() {
    let pixels = render_stars(
        WIDTH,
        HEIGHT,
        0.0,
        &[
            SyntheticStar::new(14.0, 10.0, 100.0, 2.0),
            SyntheticStar::new(22.0, 10.0, 40.0, 2.0),
        ],
    );
    let (component, values) = component_above(&pixels, 2.0);
    let disabled = DeblendParams {
        n_levels: 0,
        ..params()
    };
    assert_eq!(deblend(&component, &values, WIDTH, &disabled).len(), 1);
}

#[test]
fn test_local_grid_split_respects_connectivity() {
    // Two diagonal pixels in a 2x2 box
    let component = [0usize, WIDTH + 1];
    let grid = LocalGrid::new(&component, WIDTH);
    let mut scratch = vec![false; 2];

    let four = grid.split(&[0, 1], |_| true, Connectivity::Four, &mut scratch);
    assert_eq!(four.len(), 2);
    let eight = grid.split(&[0, 1], |_| true, Connectivity::Eight, &mut scratch);
    assert_eq!(eight, vec![vec![0, 1]]);
    assert!(scratch.iter().all(|&s| !s));
}

#[test]
fn test_branch_cap_keeps_previous_level() {
    // One row: two groups of nine 3-pixel peaks. Valleys inside a group sit
    // at 10, the valley between the groups at 2.
    let mut values = Vec::new();
    for group in 0..2 {
        if group == 1 {
            values.push(2.0);
        }
        for peak in 0..9 {
            if peak > 0 {
                values.push(10.0);
            }
            values.extend([100.0f32; 3]);
        }
    }
    let component: Vec<usize> = (0..values.len()).collect();
    let params = DeblendParams {
        n_levels: 8,
        min_contrast: 0.01,
        min_area: 2,
        connectivity: Connectivity::Four,
    };

    // The second split would yield 18 branches, above the cap of 16
    let objects = deblend(&component, &values, values.len(), &params);
    assert_eq!(objects.len(), 2);

    let total: usize = objects.iter().map(Vec::len).sum();
    assert_eq!(total, component.len());
    let first = object_containing(&objects, 0);
    let last = object_containing(&objects, values.len() - 1);
    assert_ne!(first, last);
    assert!(objects.iter().all(|o| o.len() >= 35));
}
