use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aurora::{
    BlendMode, CompositeLayer, PixelMathInput, PixelMathProgram, RenderMode, RenderOptions,
    RenderRequest, StarDetectionConfig, apply_pixel_math, detect_stars, render_composite_blocking,
};

const WIDTH: usize = 1024;
const HEIGHT: usize = 1024;

/// Flat background with Gaussian stars and uniform noise.
fn star_field(seed: u64, count: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut pixels: Vec<f32> = (0..WIDTH * HEIGHT)
        .map(|_| 100.0 + rng.random_range(-5.0..5.0))
        .collect();

    for _ in 0..count {
        let cx = rng.random_range(16.0..(WIDTH - 16) as f32);
        let cy = rng.random_range(16.0..(HEIGHT - 16) as f32);
        let amplitude = rng.random_range(200.0..2000.0);
        let sigma: f32 = rng.random_range(1.2..2.5);
        let radius = (sigma * 4.0).ceil() as isize;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let x = cx as isize + dx;
                let y = cy as isize + dy;
                let rx = x as f32 - cx;
                let ry = y as f32 - cy;
                let v = amplitude * (-(rx * rx + ry * ry) / (2.0 * sigma * sigma)).exp();
                pixels[y as usize * WIDTH + x as usize] += v;
            }
        }
    }
    pixels
}

fn bench_detection(c: &mut Criterion) {
    let pixels = star_field(7, 400);
    let mut group = c.benchmark_group("detect_stars");
    group.sample_size(10);
    for (name, config) in [
        ("default", StarDetectionConfig::default()),
        ("accurate", StarDetectionConfig::accurate()),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(detect_stars(black_box(&pixels), WIDTH, HEIGHT, &config)))
        });
    }
    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let layers = vec![
        CompositeLayer::new("ha", star_field(1, 200)).with_tint(Vec3::new(1.0, 0.2, 0.1)),
        CompositeLayer::new("oiii", star_field(2, 200))
            .with_tint(Vec3::new(0.0, 0.6, 1.0))
            .with_blend(BlendMode::Screen, 0.8),
        CompositeLayer::luminance("l", star_field(3, 200)),
    ];
    let mut group = c.benchmark_group("render_composite");
    group.sample_size(10);
    for mode in [RenderMode::Preview, RenderMode::Full] {
        let request = RenderRequest {
            layers: &layers,
            width: WIDTH,
            height: HEIGHT,
            options: RenderOptions {
                linked_stretch: true,
                auto_linear_match: true,
                auto_brightness_balance: true,
                ..Default::default()
            },
            mode,
        };
        group.bench_function(mode.to_string(), |b| {
            b.iter(|| black_box(render_composite_blocking(black_box(&request))))
        });
    }
    group.finish();
}

fn bench_pixel_math(c: &mut Criterion) {
    let r = star_field(4, 100);
    let g = star_field(5, 100);
    let b = star_field(6, 100);
    let input = PixelMathInput {
        width: WIDTH,
        height: HEIGHT,
        base: [&r, &g, &b],
        layers: Vec::new(),
    };
    let program = PixelMathProgram::new(
        "clamp(R / 2000)",
        "R > G ? sqrt(abs(G - B)) : avg(R, G, B) / 1000",
        "iif(B > 150, 1, ln(B) / 10)",
    );
    c.bench_function("apply_pixel_math", |bench| {
        bench.iter(|| black_box(apply_pixel_math(black_box(&input), &program)))
    });
}

criterion_group!(benches, bench_detection, bench_render, bench_pixel_math);
criterion_main!(benches);
