use ar_photo_canvas::canvas::SpatialCanvas;
use ar_photo_canvas::types::{AnchorFrame, MarkerId, PhotoMarker, Pose, Thumbnail};
use ar_photo_canvas::visualization::{id_to_color, log_canvas};
use image::{DynamicImage, RgbImage};
use nalgebra as na;
use time::OffsetDateTime;

#[test]
fn test_id_to_color_is_stable() {
    let a = id_to_color(&MarkerId::from("site-0001"));
    assert_eq!(a, id_to_color(&MarkerId::from("site-0001")));
    assert_eq!(a.3, 255);
    assert_ne!(a, id_to_color(&MarkerId::from("site-0002")));
}

#[test]
fn test_log_canvas_to_memory() {
    let (recording, storage) = rerun::RecordingStreamBuilder::new("canvas_test")
        .memory()
        .unwrap();

    let mut canvas = SpatialCanvas::new();
    log_canvas(&recording, "world", &canvas, 0).unwrap();

    let anchor = AnchorFrame::new(na::Isometry3::identity());
    canvas.initialize_anchor(anchor).unwrap();
    canvas
        .add_marker(PhotoMarker::from_world_pose(
            MarkerId::from("m-0001"),
            &anchor,
            &Pose::from_translation(1.0, 0.0, 0.0, 0.0),
            Thumbnail::from_image(&DynamicImage::ImageRgb8(RgbImage::new(4, 4)), 4),
            OffsetDateTime::UNIX_EPOCH,
            String::new(),
        ))
        .unwrap();
    canvas.update_preview_pose(&Pose::from_translation(0.0, 0.0, -1.0, 1.0));
    log_canvas(&recording, "world", &canvas, 1_000_000_000).unwrap();

    assert!(!storage.take().is_empty());
}
