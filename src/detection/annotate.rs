use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::geometry::{BBox, Detection};

const SUBJECT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const SITE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// Draws every detection box onto `image`. Boxes are clipped to the image; boxes
/// entirely outside it are skipped.
pub fn overlay_boxes(image: &mut RgbImage, dets: &[Detection], site_class: u32) {
    for det in dets {
        let Some(rect) = clip(&det.bbox, image.width(), image.height()) else {
            continue;
        };
        let color = if det.class_id == site_class {
            SITE_COLOR
        } else {
            SUBJECT_COLOR
        };
        draw_hollow_rect_mut(image, rect, color);
    }
}

fn clip(bbox: &BBox, width: u32, height: u32) -> Option<Rect> {
    if width == 0 || height == 0 {
        return None;
    }
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    if bbox.xmax < 0.0 || bbox.ymax < 0.0 || bbox.xmin > max_x || bbox.ymin > max_y {
        return None;
    }
    let x0 = bbox.xmin.clamp(0.0, max_x) as u32;
    let y0 = bbox.ymin.clamp(0.0, max_y) as u32;
    let x1 = bbox.xmax.clamp(0.0, max_x) as u32;
    let y1 = bbox.ymax.clamp(0.0, max_y) as u32;
    if x1 < x0 || y1 < y0 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size(x1 - x0 + 1, y1 - y0 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_outline_is_drawn_and_clipped() {
        let mut img = RgbImage::new(20, 20);
        let dets = [
            Detection::new(0, 0.9, BBox::new(2.0, 2.0, 8.0, 8.0)),
            Detection::new(1, 0.9, BBox::new(15.0, 15.0, 40.0, 40.0)),
            Detection::new(0, 0.9, BBox::new(50.0, 50.0, 60.0, 60.0)),
        ];
        overlay_boxes(&mut img, &dets, 1);

        assert_eq!(*img.get_pixel(2, 2), SUBJECT_COLOR);
        assert_eq!(*img.get_pixel(5, 5), Rgb([0, 0, 0]));
        assert_eq!(*img.get_pixel(19, 19), SITE_COLOR);
    }
}
