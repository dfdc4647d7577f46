#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ar_photo_canvas::capture::{CaptureCoordinator, FusedCaptureRecord};
use ar_photo_canvas::config::SessionConfig;
use ar_photo_canvas::error::{ImageCaptureError, PersistenceError};
use ar_photo_canvas::replay::{ReplayHandle, replay_source};
use ar_photo_canvas::sources::{
    Collaborators, ExportReply, ImageReply, PersistenceSink, StillImageSource, StoreReply,
    StoredAsset,
};
use ar_photo_canvas::types::{
    AnchorFrame, LocationSample, MotionSample, Pose, PoseSample, quaternion_from_xyzw,
};
use image::{DynamicImage, RgbImage};
use nalgebra as na;

pub fn test_image() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 6, image::Rgb([10, 20, 30])))
}

#[derive(Default)]
pub struct CameraState {
    pub requests: usize,
    pub pending: VecDeque<ImageReply>,
    /// Answer every request immediately with [`test_image`].
    pub auto: bool,
}

/// Still-image double. Requests are parked until the test resolves them
/// unless `auto` is set.
#[derive(Clone, Default)]
pub struct TestCamera(pub Arc<Mutex<CameraState>>);

impl TestCamera {
    pub fn requests(&self) -> usize {
        self.0.lock().unwrap().requests
    }

    pub fn set_auto(&self, auto: bool) {
        self.0.lock().unwrap().auto = auto;
    }

    pub fn resolve_next(&self, result: Result<DynamicImage, ImageCaptureError>) {
        let reply = self.0.lock().unwrap().pending.pop_front().expect("no pending request");
        reply.send(result);
    }

    pub fn drop_next(&self) {
        let reply = self.0.lock().unwrap().pending.pop_front().expect("no pending request");
        drop(reply);
    }
}

impl StillImageSource for TestCamera {
    fn capture_image(&mut self, reply: ImageReply) {
        let mut state = self.0.lock().unwrap();
        state.requests += 1;
        if state.auto {
            reply.send(Ok(test_image()));
        } else {
            state.pending.push_back(reply);
        }
    }
}

#[derive(Default)]
pub struct SinkState {
    pub stored: Vec<FusedCaptureRecord>,
    pub discarded: Vec<StoredAsset>,
    pub fail_next_store: bool,
    pub resets: usize,
    pub exports: usize,
    /// Park store replies instead of answering.
    pub hold: bool,
    pub held: VecDeque<(StoredAsset, StoreReply)>,
}

#[derive(Clone, Default)]
pub struct TestSink(pub Arc<Mutex<SinkState>>);

impl TestSink {
    pub fn stored_count(&self) -> usize {
        self.0.lock().unwrap().stored.len()
    }

    pub fn release_next(&self) {
        let (asset, reply) = self.0.lock().unwrap().held.pop_front().expect("no held store");
        reply.send(Ok(asset));
    }
}

impl PersistenceSink for TestSink {
    fn store(&mut self, record: FusedCaptureRecord, reply: StoreReply) {
        let mut state = self.0.lock().unwrap();
        if state.fail_next_store {
            state.fail_next_store = false;
            reply.send(Err(PersistenceError::Unavailable("disk full".to_string())));
            return;
        }
        let asset = StoredAsset {
            image_path: format!("mem://{}.png", record.id),
        };
        state.stored.push(record);
        if state.hold {
            state.held.push_back((asset, reply));
        } else {
            reply.send(Ok(asset));
        }
    }

    fn export_all(&mut self, reply: ExportReply) {
        self.0.lock().unwrap().exports += 1;
        reply.send(Ok(PathBuf::from("mem://export")));
    }

    fn discard(&mut self, asset: &StoredAsset) {
        self.0.lock().unwrap().discarded.push(asset.clone());
    }

    fn reset_session(&mut self) {
        self.0.lock().unwrap().resets += 1;
    }
}

pub struct Harness {
    pub coordinator: CaptureCoordinator,
    pub pose: ReplayHandle<PoseSample>,
    pub motion: ReplayHandle<MotionSample>,
    pub location: ReplayHandle<LocationSample>,
    pub camera: TestCamera,
    pub sink: TestSink,
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        marker_id_prefix: Some("test".to_string()),
        thumbnail_max_edge: 4,
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: SessionConfig) -> Harness {
    let (pose_source, pose) = replay_source("pose");
    let (motion_source, motion) = replay_source("motion");
    let (location_source, location) = replay_source("location");
    let camera = TestCamera::default();
    let sink = TestSink::default();
    let coordinator = CaptureCoordinator::new(
        config,
        Collaborators {
            pose: Box::new(pose_source),
            motion: Box::new(motion_source),
            location: Box::new(location_source),
            camera: Box::new(camera.clone()),
            sink: Box::new(sink.clone()),
        },
    );
    Harness {
        coordinator,
        pose,
        motion,
        location,
        camera,
        sink,
    }
}

pub fn pose_sample(x: f64, y: f64, z: f64, t: f64) -> PoseSample {
    PoseSample {
        pose: Pose::from_translation(x, y, z, t),
        intrinsics: None,
        scan_ready: true,
    }
}

pub fn motion_sample(t: f64) -> MotionSample {
    MotionSample {
        attitude: quaternion_from_xyzw([0.0, 0.0, 0.0, 1.0]).unwrap(),
        rotation_rate: na::Vector3::new(0.01, 0.0, 0.0),
        gravity: na::Vector3::new(0.0, -1.0, 0.0),
        user_acceleration: na::Vector3::zeros(),
        timestamp: t,
    }
}

pub fn location_sample(t: f64) -> LocationSample {
    LocationSample {
        latitude: 52.52,
        longitude: 13.405,
        altitude: 34.0,
        horizontal_accuracy: 5.0,
        vertical_accuracy: 3.0,
        speed: None,
        course: None,
        timestamp: t,
    }
}

impl Harness {
    pub fn push_pose(&self, x: f64, y: f64, z: f64, t: f64) {
        assert!(self.pose.emit(pose_sample(x, y, z, t)));
    }

    /// Started, scanned and anchored at the identity transform.
    pub fn anchored(mut self) -> Harness {
        self.coordinator.start_services().unwrap();
        self.push_pose(0.0, 0.0, 0.0, 0.0);
        self.coordinator.pump();
        self.coordinator
            .place_anchor(AnchorFrame::new(na::Isometry3::identity()))
            .unwrap();
        self
    }
}
