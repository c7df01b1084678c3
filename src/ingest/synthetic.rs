use crate::frame::CHANNELS;

const BACKGROUND: [u8; 3] = [48, 52, 56];
const PARTICLE: [u8; 3] = [230, 210, 40];
const SCRATCH: [u8; 3] = [200, 60, 50];

/// Deterministic wafer-like scene for `stub://` sources.
///
/// Each frame shows a uniform background, one square particle drifting
/// horizontally and one thin static scratch, so the CPU backend finds exactly
/// two defects per frame.
pub(crate) fn scene_pixels(width: u32, height: u32, frame_index: u64) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let mut pixels = Vec::with_capacity(w * h * CHANNELS);
    for _ in 0..w * h {
        pixels.extend_from_slice(&BACKGROUND);
    }

    let side = (w.min(h) / 8).max(2);
    let travel = w.saturating_sub(side + 2).max(1);
    let px = 1 + (frame_index as usize * 4) % travel;
    let py = h / 4;
    fill_rect(&mut pixels, w, h, px, py, side, side, PARTICLE);

    let bar_len = (w / 3).max(6);
    let bar_thickness = (h / 60).max(2);
    fill_rect(
        &mut pixels,
        w,
        h,
        w / 3,
        (h * 3) / 4,
        bar_len,
        bar_thickness,
        SCRATCH,
    );

    pixels
}

#[allow(clippy::too_many_arguments)]
fn fill_rect(
    pixels: &mut [u8],
    w: usize,
    h: usize,
    x0: usize,
    y0: usize,
    rw: usize,
    rh: usize,
    color: [u8; 3],
) {
    for y in y0..(y0 + rh).min(h) {
        for x in x0..(x0 + rw).min(w) {
            let offset = (y * w + x) * CHANNELS;
            pixels[offset..offset + CHANNELS].copy_from_slice(&color);
        }
    }
}

/// Parse the optional `?frames=N` suffix of a `stub://` reference.
pub(crate) fn stub_frame_limit(reference: &str) -> Option<u64> {
    let (_, query) = reference.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "frames")
        .and_then(|(_, value)| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_has_expected_size_and_moves() {
        let a = scene_pixels(64, 48, 0);
        let b = scene_pixels(64, 48, 1);
        assert_eq!(a.len(), 64 * 48 * 3);
        assert_ne!(a, b);
        assert_eq!(&a[0..3], &BACKGROUND);
    }

    #[test]
    fn frame_limit_is_read_from_query() {
        assert_eq!(stub_frame_limit("stub://clip?frames=12"), Some(12));
        assert_eq!(stub_frame_limit("stub://clip?fps=5&frames=3"), Some(3));
        assert_eq!(stub_frame_limit("stub://clip"), None);
        assert_eq!(stub_frame_limit("stub://clip?frames=x"), None);
    }
}
