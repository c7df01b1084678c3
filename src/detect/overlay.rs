use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use super::result::Detection;
use crate::frame::Frame;

const BOX_THICKNESS: i32 = 3;
const TAB_HEIGHT: u32 = 8;

const PALETTE: [[u8; 3]; 6] = [
    [34, 139, 34],
    [0, 100, 255],
    [255, 140, 0],
    [220, 20, 60],
    [148, 0, 211],
    [0, 206, 209],
];

pub fn class_color(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
}

/// Copy of `frame` with one box and one class-coloured tab per detection.
pub fn draw_detections(frame: &Frame, detections: &[Detection]) -> Frame {
    let mut image = frame.to_rgb_image();
    for detection in detections {
        draw_detection(&mut image, detection);
    }
    Frame::from_rgb_image(image, frame.index)
}

fn draw_detection(image: &mut RgbImage, detection: &Detection) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let x1 = detection.x1().max(0.0) as i32;
    let y1 = detection.y1().max(0.0) as i32;
    let x2 = (detection.x2().min(width as f32) as i32).max(x1 + 1);
    let y2 = (detection.y2().min(height as f32) as i32).max(y1 + 1);
    let color = class_color(detection.class_id);

    for offset in 0..BOX_THICKNESS {
        let rect = Rect::at(x1 - offset, y1 - offset)
            .of_size((x2 - x1 + offset * 2) as u32, (y2 - y1 + offset * 2) as u32);
        draw_hollow_rect_mut(image, rect, color);
    }

    // Confidence-scaled tab above the box stands in for a text label.
    let tab_width = ((x2 - x1) as f32 * detection.confidence.clamp(0.0, 1.0)).max(1.0) as u32;
    let tab_y = (y1 - BOX_THICKNESS - TAB_HEIGHT as i32).max(0);
    draw_filled_rect_mut(
        image,
        Rect::at(x1, tab_y).of_size(tab_width, TAB_HEIGHT),
        color,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_draws_on_a_copy() -> anyhow::Result<()> {
        let frame = Frame::new(vec![0u8; 40 * 40 * 3], 40, 40, 7)?;
        let detection = Detection::from_corners("particle", 0, 1.0, (10.0, 20.0), (30.0, 30.0));

        let annotated = draw_detections(&frame, &[detection]);
        assert_eq!(annotated.index, 7);
        assert_eq!(frame.pixel(10, 20), Some([0, 0, 0]));
        assert_eq!(annotated.pixel(10, 20), Some(PALETTE[0]));
        assert_eq!(annotated.pixel(20, 25), Some([0, 0, 0]));
        Ok(())
    }

    #[test]
    fn boxes_outside_the_frame_are_clipped() -> anyhow::Result<()> {
        let frame = Frame::new(vec![0u8; 10 * 10 * 3], 10, 10, 0)?;
        let detection = Detection::from_corners("scratch", 1, 0.5, (-20.0, -5.0), (50.0, 4.0));
        let annotated = draw_detections(&frame, &[detection]);
        assert_eq!((annotated.width, annotated.height), (10, 10));
        Ok(())
    }
}
