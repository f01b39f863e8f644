use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: u32,
}

/// A fan of `count` vertices around the origin, tinted by `seed`.
pub fn fan(count: usize, seed: u32) -> Vec<Vertex> {
    let step = std::f32::consts::TAU / count.max(1) as f32;
    (0..count)
        .map(|i| {
            let angle = i as f32 * step;
            Vertex {
                position: [angle.cos(), angle.sin(), 0.0],
                color: seed.wrapping_mul(0x9e37_79b9) | 0xff,
            }
        })
        .collect()
}

pub fn fan_indices(count: usize) -> Vec<u16> {
    (0..count).map(|i| (i % u16::MAX as usize) as u16).collect()
}

/// Draw sizes for one frame; every 16th frame overflows the dynamic
/// buffer inside the depth pre-pass.
pub fn frame_draws(frame: u64, capacity: usize) -> (Vec<usize>, Vec<usize>) {
    let pre_pass = if frame % 16 == 15 {
        vec![capacity * 3 / 8; 3]
    } else {
        vec![capacity / 16 + (frame as usize % 7) * 32]
    };
    let main_pass = (0..4)
        .map(|i| 64 + ((frame as usize * 131 + i * 47) % (capacity / 16)))
        .collect();
    (pre_pass, main_pass)
}
