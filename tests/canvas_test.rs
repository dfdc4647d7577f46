use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex, Weak};

use ar_photo_canvas::canvas::{CanvasObserver, SpatialCanvas};
use ar_photo_canvas::error::CanvasError;
use ar_photo_canvas::types::{AnchorFrame, MarkerId, PhotoMarker, Pose, Thumbnail};
use image::{DynamicImage, RgbImage};
use nalgebra as na;
use time::OffsetDateTime;

fn thumb(shade: u8) -> Thumbnail {
    Thumbnail::from_image(
        &DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, image::Rgb([shade, 0, 0]))),
        4,
    )
}

fn marker(anchor: &AnchorFrame, id: &str, x: f64, y: f64, z: f64) -> PhotoMarker {
    PhotoMarker::from_world_pose(
        MarkerId::from(id),
        anchor,
        &Pose::from_translation(x, y, z, 0.0),
        thumb(0),
        OffsetDateTime::UNIX_EPOCH,
        format!("{}.png", id),
    )
}

fn anchored_canvas() -> (SpatialCanvas, AnchorFrame) {
    let anchor = AnchorFrame::new(na::Isometry3::translation(0.0, 0.0, -1.0));
    let mut canvas = SpatialCanvas::new();
    canvas.initialize_anchor(anchor).unwrap();
    (canvas, anchor)
}

#[derive(Default)]
struct RecordingObserver {
    calls: Mutex<Vec<Vec<MarkerId>>>,
}

impl CanvasObserver for RecordingObserver {
    fn on_markers_changed(&self, markers: &[PhotoMarker]) {
        self.calls
            .lock()
            .unwrap()
            .push(markers.iter().map(|m| m.id().clone()).collect());
    }
}

#[test]
fn test_initialize_anchor_only_once() {
    let (mut canvas, anchor) = anchored_canvas();
    let other = AnchorFrame::new(na::Isometry3::translation(5.0, 0.0, 0.0));
    assert_eq!(
        canvas.initialize_anchor(other),
        Err(CanvasError::AlreadyInitialized)
    );
    assert_eq!(canvas.anchor(), Some(&anchor));
}

#[test]
fn test_add_marker_requires_anchor() {
    let mut canvas = SpatialCanvas::new();
    let anchor = AnchorFrame::new(na::Isometry3::identity());
    let result = canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, 0.0));
    assert_eq!(result, Err(CanvasError::NotInitialized));
    assert!(canvas.is_empty());
}

#[test]
fn test_add_and_remove_marker() {
    let (mut canvas, anchor) = anchored_canvas();
    canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, -1.0)).unwrap();
    canvas.add_marker(marker(&anchor, "b", 1.0, 1.0, -1.0)).unwrap();
    assert_eq!(canvas.len(), 2);

    let node = canvas.node(&MarkerId::from("a")).unwrap();
    // Node world transform is anchor · relative, i.e. the original world pose.
    assert!((node.world_transform.translation.vector - na::Vector3::new(1.0, 0.0, -1.0)).norm() < 1e-9);
    let relative = canvas.marker(&MarkerId::from("b")).unwrap().relative_position();
    assert!((relative - na::Vector3::new(1.0, 1.0, 0.0)).norm() < 1e-9);

    assert!(canvas.remove_marker(&MarkerId::from("a")));
    assert!(!canvas.contains(&MarkerId::from("a")));
    assert_eq!(canvas.len(), 1);
    assert_eq!(canvas.nodes()[0].marker.id().as_str(), "b");
}

#[test]
fn test_duplicate_marker_rejected() {
    let (mut canvas, anchor) = anchored_canvas();
    canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, 0.0)).unwrap();
    let result = canvas.add_marker(marker(&anchor, "a", 2.0, 0.0, 0.0));
    assert_eq!(result, Err(CanvasError::DuplicateMarker(MarkerId::from("a"))));
    assert_eq!(canvas.len(), 1);
    let kept = canvas.marker(&MarkerId::from("a")).unwrap();
    assert!((kept.relative_position().x - 1.0).abs() < 1e-9);
}

#[test]
fn test_remove_unknown_marker_is_noop() {
    let (mut canvas, anchor) = anchored_canvas();
    canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, 0.0)).unwrap();
    assert!(!canvas.remove_marker(&MarkerId::from("missing")));
    assert_eq!(canvas.len(), 1);
}

#[test]
fn test_update_marker_keeps_geometry() {
    let (mut canvas, anchor) = anchored_canvas();
    canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, -1.0)).unwrap();

    let mut replacement = marker(&anchor, "a", 9.0, 9.0, 9.0);
    replacement.thumbnail = thumb(200);
    replacement.image_path = "edited.png".to_string();
    canvas.update_marker(&replacement).unwrap();

    let updated = canvas.marker(&MarkerId::from("a")).unwrap();
    assert_eq!(updated.thumbnail, thumb(200));
    assert_eq!(updated.image_path, "edited.png");
    assert!((updated.relative_position() - na::Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-9);

    let missing = marker(&anchor, "zz", 0.0, 0.0, 0.0);
    assert_eq!(
        canvas.update_marker(&missing),
        Err(CanvasError::MarkerNotFound(MarkerId::from("zz")))
    );
}

#[test]
fn test_preview_pose_hidden_without_anchor() {
    let mut canvas = SpatialCanvas::new();
    assert!(canvas.update_preview_pose(&Pose::from_translation(1.0, 0.0, 0.0, 0.0)).is_none());
    assert!(!canvas.reticle().visible);
    assert!(canvas.reticle().relative.is_none());
}

#[test]
fn test_preview_pose_is_idempotent() {
    let (mut canvas, _) = anchored_canvas();
    let pose = Pose::from_translation(0.0, 0.5, 0.0, 1.0);
    let first = canvas.update_preview_pose(&pose).unwrap();
    let second = canvas.update_preview_pose(&pose).unwrap();
    assert_eq!(first, second);
    assert!((first.position() - na::Vector3::new(0.0, 0.5, 1.0)).norm() < 1e-9);
    assert!(canvas.reticle().visible);
    assert_eq!(canvas.reticle().world_transform, Some(pose.transform));
    assert!(canvas.is_empty());
}

#[test]
fn test_reset_clears_everything() {
    let (mut canvas, anchor) = anchored_canvas();
    canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, 0.0)).unwrap();
    canvas.update_preview_pose(&Pose::from_translation(0.0, 0.0, 0.0, 0.0));
    canvas.reset();
    assert!(!canvas.is_initialized());
    assert!(canvas.is_empty());
    assert!(!canvas.reticle().visible);

    // A fresh anchor is accepted after reset.
    canvas.initialize_anchor(anchor).unwrap();
}

#[test]
fn test_observer_notified_on_changes() {
    let (mut canvas, anchor) = anchored_canvas();
    let observer = Arc::new(RecordingObserver::default());
    let weak: Weak<dyn CanvasObserver> = Arc::downgrade(&observer) as Weak<dyn CanvasObserver>;
    canvas.set_observer(weak);

    canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, 0.0)).unwrap();
    canvas.add_marker(marker(&anchor, "b", 2.0, 0.0, 0.0)).unwrap();
    canvas.remove_marker(&MarkerId::from("missing"));
    canvas.remove_marker(&MarkerId::from("a"));
    canvas.reset();

    let calls = observer.calls.lock().unwrap();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[1], vec![MarkerId::from("a"), MarkerId::from("b")]);
    assert_eq!(calls[2], vec![MarkerId::from("b")]);
    assert!(calls[3].is_empty());
}

#[test]
fn test_dropped_observer_is_not_kept_alive() {
    let (mut canvas, anchor) = anchored_canvas();
    let seen = Rc::new(RefCell::new(0));
    {
        let observer = Arc::new(RecordingObserver::default());
        canvas.set_observer(Arc::downgrade(&observer) as Weak<dyn CanvasObserver>);
        canvas.add_marker(marker(&anchor, "a", 1.0, 0.0, 0.0)).unwrap();
        *seen.borrow_mut() = observer.calls.lock().unwrap().len();
    }
    // Observer is gone; mutations must still succeed.
    canvas.add_marker(marker(&anchor, "b", 1.0, 0.0, 0.0)).unwrap();
    assert_eq!(*seen.borrow(), 1);
    assert_eq!(canvas.len(), 2);
}
