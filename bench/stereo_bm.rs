use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cv_stereo_rig::prelude::*;
use image::{imageops, GrayImage};

/// Random texture and the same texture shifted by `disparity` pixels.
fn textured_pair(width: u32, height: u32, disparity: u32) -> GrayStereoFrame {
    let mut state: u64 = 0x2545_f491;
    let mut texture = GrayImage::new(width + disparity, height);
    for p in texture.pixels_mut() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        p.0[0] = (state % 256) as u8;
    }

    let left = imageops::crop_imm(&texture, 0, 0, width, height).to_image();
    let right = imageops::crop_imm(&texture, disparity, 0, width, height).to_image();
    GrayStereoFrame::new(left, right)
}

fn stereo_bm_bench(c: &mut Criterion) {
    // One eye of the rig's default capture mode
    let frame = textured_pair(640, 376, 12);

    let mut default_bm = BlockMatcher::new();

    let mut sobel_bm = BlockMatcher::new();
    sobel_bm.set_prefilter_type(1).unwrap();
    sobel_bm.set_speckle_window_size(0).unwrap();

    c.bench_function("stereo_bm default 640x376", |b| {
        b.iter(|| default_bm.compute(black_box(&frame)))
    });
    c.bench_function("stereo_bm xsobel no speckle 640x376", |b| {
        b.iter(|| sobel_bm.compute(black_box(&frame)))
    });
}

criterion_group!(benches, stereo_bm_bench);
criterion_main!(benches);
