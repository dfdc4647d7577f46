use image::DynamicImage;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{
    AnchorFrame, CameraIntrinsics, LocationSample, MarkerId, MotionSample, PoseSample,
    RelativePose, Thumbnail,
};

/// Latest sensor readings frozen at the moment a capture was requested.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrozenInputs {
    pub pose: PoseSample,
    pub motion: Option<MotionSample>,
    pub location: Option<LocationSample>,
}

impl FrozenInputs {
    /// Seconds by which the pose trails the newest motion or location
    /// sample, with the name of that stream. `None` without either sample.
    pub fn pose_lag(&self) -> Option<(f64, &'static str)> {
        let motion = self.motion.map(|m| (m.timestamp, "motion"));
        let location = self.location.map(|l| (l.timestamp, "location"));
        let (newest, stream) = match (motion, location) {
            (Some(m), Some(l)) => {
                if l.0 > m.0 {
                    l
                } else {
                    m
                }
            }
            (Some(m), None) => m,
            (None, Some(l)) => l,
            (None, None) => return None,
        };
        Some((newest - self.pose.pose.timestamp, stream))
    }
}

/// Everything known about one shutter press. Lives only until the sink
/// has taken it.
#[derive(Debug, Clone)]
pub struct FusedCaptureRecord {
    pub id: MarkerId,
    pub relative: RelativePose,
    pub inputs: FrozenInputs,
    pub image: DynamicImage,
    pub thumbnail: Thumbnail,
    pub metadata: CaptureMetadata,
}

impl FusedCaptureRecord {
    pub fn assemble(
        id: MarkerId,
        anchor: &AnchorFrame,
        inputs: FrozenInputs,
        image: DynamicImage,
        thumbnail_max_edge: u32,
        captured_at: OffsetDateTime,
    ) -> FusedCaptureRecord {
        let relative = anchor.relative(&inputs.pose.pose);
        let thumbnail = Thumbnail::from_image(&image, thumbnail_max_edge);
        let metadata = CaptureMetadata::new(&id, &relative, &inputs, &image, captured_at);
        FusedCaptureRecord {
            id,
            relative,
            inputs,
            image,
            thumbnail,
            metadata,
        }
    }
}

/// The fixed metadata set written next to every photo. Missing sensors are
/// recorded as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub photo_id: MarkerId,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// Tracking-clock timestamp of the frozen pose, seconds.
    pub frame_timestamp: f64,
    pub relative_position: [f64; 3],
    /// `[x, y, z, w]`
    pub relative_orientation: [f64; 4],
    /// `[roll, pitch, yaw]`, radians
    pub relative_euler_angles: [f64; 3],
    pub world_position: [f64; 3],
    pub world_orientation: [f64; 4],
    pub intrinsics: Option<CameraIntrinsics>,
    pub motion: Option<MotionMetadata>,
    pub location: Option<LocationSample>,
    pub image_size: (u32, u32),
    /// Filled in once the sink has stored the full-resolution asset.
    pub image_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionMetadata {
    pub attitude: [f64; 4],
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub rotation_rate: [f64; 3],
    pub gravity: [f64; 3],
    pub user_acceleration: [f64; 3],
    pub timestamp: f64,
}

fn xyz(v: &na::Vector3<f64>) -> [f64; 3] {
    [v.x, v.y, v.z]
}

fn xyzw(q: &na::UnitQuaternion<f64>) -> [f64; 4] {
    [q.i, q.j, q.k, q.w]
}

impl From<&MotionSample> for MotionMetadata {
    fn from(m: &MotionSample) -> Self {
        let (roll, pitch, yaw) = m.attitude.euler_angles();
        MotionMetadata {
            attitude: xyzw(&m.attitude),
            roll,
            pitch,
            yaw,
            rotation_rate: xyz(&m.rotation_rate),
            gravity: xyz(&m.gravity),
            user_acceleration: xyz(&m.user_acceleration),
            timestamp: m.timestamp,
        }
    }
}

impl CaptureMetadata {
    pub fn new(
        id: &MarkerId,
        relative: &RelativePose,
        inputs: &FrozenInputs,
        image: &DynamicImage,
        captured_at: OffsetDateTime,
    ) -> CaptureMetadata {
        let (roll, pitch, yaw) = relative.euler_angles();
        let world = &inputs.pose.pose.transform;
        CaptureMetadata {
            photo_id: id.clone(),
            captured_at,
            frame_timestamp: inputs.pose.pose.timestamp,
            relative_position: xyz(&relative.position()),
            relative_orientation: xyzw(&relative.orientation()),
            relative_euler_angles: [roll, pitch, yaw],
            world_position: xyz(&world.translation.vector),
            world_orientation: xyzw(&world.rotation),
            intrinsics: inputs.pose.intrinsics,
            motion: inputs.motion.as_ref().map(MotionMetadata::from),
            location: inputs.location,
            image_size: (image.width(), image.height()),
            image_path: None,
        }
    }
}
