//! Overlay drawing on BGR frames.
//!
//! Frames are annotated in place through an `ImageBuffer` view over the frame
//! bytes. Channel order stays BGR, so colours below are written `[b, g, r]`.

use image::{ImageBuffer, Rgb};
use ml_core::BoundingBox;
use video_ingest::Frame;

use crate::vision::{
    config::StreamConfig,
    data::{Detection, DetectionBatch},
};

/// Vertical gap between a box's top edge and its label.
pub(crate) const LABEL_MARGIN: i32 = 10;
pub(crate) const GLYPH_WIDTH: i32 = 5;
pub(crate) const GLYPH_HEIGHT: i32 = 7;
const GLYPH_ADVANCE: i32 = GLYPH_WIDTH + 1;
const BOX_THICKNESS: i32 = 2;

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

const PANEL_WIDTH: i32 = 200;
const PANEL_HEIGHT: i32 = 100;
const PANEL_INSET: i32 = 10;
const PANEL_LINE_HEIGHT: i32 = 12;

/// Detector output after its class id has been resolved to a name.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LabelledDetection {
    pub(crate) bbox: BoundingBox,
    pub(crate) label: &'static str,
    pub(crate) confidence: f32,
}

/// Integer box clamped to the frame, with ordered corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PixelBox {
    pub(crate) left: i32,
    pub(crate) top: i32,
    pub(crate) right: i32,
    pub(crate) bottom: i32,
}

impl PixelBox {
    pub(crate) fn clamped(bbox: &BoundingBox, width: i32, height: i32) -> Self {
        let max_x = (width - 1).max(0);
        let max_y = (height - 1).max(0);
        let fit = |value: f32, max: i32| -> i32 {
            if value.is_finite() {
                (value.round() as i32).clamp(0, max)
            } else {
                0
            }
        };
        let (x1, x2) = (fit(bbox.x1, max_x), fit(bbox.x2, max_x));
        let (y1, y2) = (fit(bbox.y1, max_y), fit(bbox.y2, max_y));
        Self {
            left: x1.min(x2),
            top: y1.min(y2),
            right: x1.max(x2),
            bottom: y1.max(y2),
        }
    }
}

/// `"{class}: {percent:.2}%"`, as drawn on the stream.
pub(crate) fn stream_label(label: &str, confidence: f32) -> String {
    format!("{}: {:.2}%", label, confidence as f64 * 100.0)
}

/// Top-left corner for a label above `bbox`, kept inside the frame.
pub(crate) fn label_origin(bbox: PixelBox, width: i32, height: i32) -> (i32, i32) {
    let x = bbox.left.clamp(0, (width - 1).max(0));
    let y = (bbox.top - LABEL_MARGIN).clamp(0, (height - GLYPH_HEIGHT).max(0));
    (x, y)
}

/// Draw stream overlays per `config` and return the frame's detection batch.
pub(crate) fn annotate(
    frame: &mut Frame,
    detections: &[LabelledDetection],
    config: &StreamConfig,
    frame_number: u64,
) -> DetectionBatch {
    let (width, height) = (frame.width, frame.height);
    let canvas = if config.show_boxes || config.show_labels {
        Canvas::new(frame)
    } else {
        None
    };
    if let Some(mut canvas) = canvas {
        for det in detections {
            let bbox = PixelBox::clamped(&det.bbox, width, height);
            if config.show_boxes {
                canvas.rectangle(bbox, BOX_THICKNESS, GREEN);
            }
            if config.show_labels {
                let (x, y) = label_origin(bbox, width, height);
                canvas.text(x, y, &stream_label(det.label, det.confidence), GREEN);
            }
        }
    }

    DetectionBatch {
        frame_number,
        detections: detections
            .iter()
            .map(|det| Detection {
                label: det.label.to_string(),
                confidence: det.confidence,
            })
            .collect(),
    }
}

/// Blue for low confidence shading to green for high confidence.
pub(crate) fn confidence_color(confidence: f32) -> Rgb<u8> {
    let c = confidence.clamp(0.0, 1.0);
    Rgb([(255.0 * (1.0 - c)) as u8, (255.0 * c) as u8, 0])
}

/// Desktop preview overlay: confidence-coloured boxes, a detection list panel
/// in the top-right corner and an FPS read-out.
pub(crate) fn annotate_preview(frame: &mut Frame, detections: &[LabelledDetection], fps: f32) {
    let (width, height) = (frame.width, frame.height);
    let Some(mut canvas) = Canvas::new(frame) else {
        return;
    };

    for det in detections {
        let color = confidence_color(det.confidence);
        let bbox = PixelBox::clamped(&det.bbox, width, height);
        canvas.rectangle(bbox, BOX_THICKNESS, color);
        let (x, y) = label_origin(bbox, width, height);
        canvas.text(x, y, &format!("{}: {:.2}", det.label, det.confidence), color);
    }

    let panel_left = (width - PANEL_WIDTH - PANEL_INSET).max(0);
    let panel_top = PANEL_INSET.min(height);
    let panel_right = (panel_left + PANEL_WIDTH - 1).min(width - 1);
    let panel_bottom = (panel_top + PANEL_HEIGHT - 1).min(height - 1);
    canvas.fill(panel_left, panel_top, panel_right, panel_bottom, BLACK);
    canvas.text(panel_left + 10, panel_top + 6, "Detections:", WHITE);
    let mut line_y = panel_top + 6 + 2 * PANEL_LINE_HEIGHT;
    for det in detections {
        if line_y + GLYPH_HEIGHT > panel_bottom {
            break;
        }
        let line = format!("{}: {:.2}", det.label, det.confidence);
        canvas.text(panel_left + 10, line_y, &line, WHITE);
        line_y += PANEL_LINE_HEIGHT;
    }

    canvas.text(10, 10, &format!("FPS: {fps:.2}"), GREEN);
}

struct Canvas<'a> {
    image: ImageBuffer<Rgb<u8>, &'a mut [u8]>,
}

impl<'a> Canvas<'a> {
    fn new(frame: &'a mut Frame) -> Option<Self> {
        if frame.width <= 0 || frame.height <= 0 {
            return None;
        }
        let (width, height) = (frame.width as u32, frame.height as u32);
        ImageBuffer::from_raw(width, height, frame.data.as_mut_slice()).map(|image| Self { image })
    }

    fn put(&mut self, x: i32, y: i32, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height() {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }

    fn fill(&mut self, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
        for y in top..=bottom {
            for x in left..=right {
                self.put(x, y, color);
            }
        }
    }

    fn rectangle(&mut self, bbox: PixelBox, thickness: i32, color: Rgb<u8>) {
        for inset in 0..thickness {
            let (left, top) = (bbox.left + inset, bbox.top + inset);
            let (right, bottom) = (bbox.right - inset, bbox.bottom - inset);
            if left > right || top > bottom {
                break;
            }
            for x in left..=right {
                self.put(x, top, color);
                self.put(x, bottom, color);
            }
            for y in top..=bottom {
                self.put(left, y, color);
                self.put(right, y, color);
            }
        }
    }

    fn text(&mut self, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
        for ch in text.chars().flat_map(char::to_uppercase) {
            if let Some(glyph) = glyph_bits(ch) {
                for (row, pattern) in glyph.iter().enumerate() {
                    for col in 0..GLYPH_WIDTH {
                        if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                            self.put(x + col, y + row as i32, color);
                        }
                    }
                }
            }
            x += GLYPH_ADVANCE;
        }
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '%' => [0b10001, 0b10010, 0b00100, 0b01000, 0b10010, 0b10001, 0b00000],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(bbox: BoundingBox, confidence: f32) -> LabelledDetection {
        LabelledDetection {
            bbox,
            label: "Weapons",
            confidence,
        }
    }

    fn config(show_boxes: bool, show_labels: bool) -> StreamConfig {
        StreamConfig {
            show_boxes,
            show_labels,
            confidence_threshold: 0.3,
        }
    }

    #[test]
    fn label_text_reports_two_decimal_percentages() {
        assert_eq!(stream_label("Weapons", 0.87654), "Weapons: 87.65%");
        assert_eq!(stream_label("Bags Theft", 1.0), "Bags Theft: 100.00%");
        assert_eq!(stream_label("Suspect", 0.3), "Suspect: 30.00%");
    }

    #[test]
    fn label_near_top_edge_is_clamped_inside_the_frame() {
        for top in [-40.0, 0.0, 3.0, 9.0] {
            let bbox = PixelBox::clamped(&BoundingBox::new(5.0, top, 40.0, 60.0), 100, 80);
            let (_, y) = label_origin(bbox, 100, 80);
            assert!(y >= 0, "label y {y} for box top {top}");
        }
        let bbox = PixelBox::clamped(&BoundingBox::new(5.0, 50.0, 40.0, 60.0), 100, 80);
        assert_eq!(label_origin(bbox, 100, 80), (5, 40));
        let bbox = PixelBox::clamped(&BoundingBox::new(0.0, 0.0, 4.0, 4.0), 10, 5);
        assert_eq!(label_origin(bbox, 10, 5), (0, 0));
    }

    #[test]
    fn malformed_boxes_are_clamped_and_ordered() {
        let bbox = PixelBox::clamped(&BoundingBox::new(500.0, -20.0, -3.0, f32::NAN), 64, 48);
        assert_eq!(
            bbox,
            PixelBox {
                left: 0,
                top: 0,
                right: 63,
                bottom: 0
            }
        );
    }

    #[test]
    fn boxes_are_drawn_green_when_enabled() {
        let mut frame = Frame::black(64, 48).unwrap();
        let dets = [detection(BoundingBox::new(10.0, 20.0, 30.0, 40.0), 0.9)];
        annotate(&mut frame, &dets, &config(true, false), 1);
        assert_eq!(frame.pixel(10, 20), Some([0, 255, 0]));
        assert_eq!(frame.pixel(11, 21), Some([0, 255, 0]));
        assert_eq!(frame.pixel(30, 40), Some([0, 255, 0]));
        assert_eq!(frame.pixel(20, 30), Some([0, 0, 0]));
    }

    #[test]
    fn disabled_overlays_leave_the_frame_untouched_but_keep_detections() {
        let mut frame = Frame::black(64, 48).unwrap();
        let dets = [
            detection(BoundingBox::new(10.0, 20.0, 30.0, 40.0), 0.9),
            detection(BoundingBox::new(1.0, 2.0, 3.0, 4.0), 0.4),
        ];
        let batch = annotate(&mut frame, &dets, &config(false, false), 9);
        assert!(frame.data.iter().all(|&b| b == 0));
        assert_eq!(batch.frame_number, 9);
        assert_eq!(batch.detections.len(), 2);
        assert_eq!(batch.detections[1].label, "Weapons");
        assert_eq!(batch.detections[1].confidence, 0.4);
    }

    #[test]
    fn labels_only_draw_text_above_the_box() {
        let mut frame = Frame::black(200, 60).unwrap();
        let dets = [detection(BoundingBox::new(10.0, 30.0, 50.0, 50.0), 0.5)];
        annotate(&mut frame, &dets, &config(false, true), 1);
        let lit_rows: Vec<i32> = (0..60)
            .filter(|&y| (0..200).any(|x| frame.pixel(x, y) != Some([0, 0, 0])))
            .collect();
        assert!(!lit_rows.is_empty());
        assert!(lit_rows.iter().all(|&y| (20..20 + GLYPH_HEIGHT).contains(&y)));
    }

    #[test]
    fn preview_overlay_draws_panel_and_confidence_colours() {
        let mut frame = Frame::from_bgr(320, 240, vec![128; 320 * 240 * 3]).unwrap();
        let dets = [detection(BoundingBox::new(20.0, 40.0, 60.0, 80.0), 1.0)];
        annotate_preview(&mut frame, &dets, 29.97);
        assert_eq!(frame.pixel(20, 40), Some([0, 255, 0]));
        assert_eq!(frame.pixel(320 - 15, 100), Some([0, 0, 0]));
        assert_eq!(confidence_color(0.0), Rgb([255, 0, 0]));
    }

    #[test]
    fn preview_overlay_survives_tiny_frames() {
        let mut frame = Frame::black(8, 4).unwrap();
        let dets = [detection(BoundingBox::new(-5.0, -5.0, 50.0, 50.0), 0.2)];
        annotate_preview(&mut frame, &dets, 0.0);
    }
}
