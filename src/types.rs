use std::fmt;

use image::{DynamicImage, RgbaImage};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const RIGID_TOLERANCE: f64 = 1e-4;

/// Device pose in the tracking system's world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub transform: na::Isometry3<f64>,
    /// Seconds on the tracking clock.
    pub timestamp: f64,
}

impl Pose {
    pub fn new(transform: na::Isometry3<f64>, timestamp: f64) -> Pose {
        Pose {
            transform,
            timestamp,
        }
    }

    pub fn from_translation(x: f64, y: f64, z: f64, timestamp: f64) -> Pose {
        Pose::new(
            na::Isometry3::from_parts(
                na::Translation3::new(x, y, z),
                na::UnitQuaternion::identity(),
            ),
            timestamp,
        )
    }

    /// Builds a pose from a homogeneous 4x4 transform as handed out by AR
    /// tracking frameworks. Returns `None` if the matrix is not rigid.
    pub fn from_matrix(m: &na::Matrix4<f64>, timestamp: f64) -> Option<Pose> {
        isometry_from_matrix(m).map(|transform| Pose::new(transform, timestamp))
    }

    pub fn position(&self) -> na::Vector3<f64> {
        self.transform.translation.vector
    }
}

pub(crate) fn isometry_from_matrix(m: &na::Matrix4<f64>) -> Option<na::Isometry3<f64>> {
    let bottom = m.fixed_view::<1, 4>(3, 0);
    if (bottom - na::RowVector4::new(0.0, 0.0, 0.0, 1.0)).norm() > RIGID_TOLERANCE {
        return None;
    }
    let r: na::Matrix3<f64> = m.fixed_view::<3, 3>(0, 0).into_owned();
    let orthogonality = (r.transpose() * r - na::Matrix3::identity()).norm();
    if orthogonality > RIGID_TOLERANCE || (r.determinant() - 1.0).abs() > RIGID_TOLERANCE {
        return None;
    }
    let rotation = na::UnitQuaternion::from_rotation_matrix(&na::Rotation3::from_matrix_unchecked(r));
    let translation = na::Translation3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]);
    Some(na::Isometry3::from_parts(translation, rotation))
}

/// The session's spatial origin in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorFrame(na::Isometry3<f64>);

impl AnchorFrame {
    pub fn new(world_transform: na::Isometry3<f64>) -> AnchorFrame {
        AnchorFrame(world_transform)
    }

    pub fn from_matrix(m: &na::Matrix4<f64>) -> Option<AnchorFrame> {
        isometry_from_matrix(m).map(AnchorFrame)
    }

    pub fn world_transform(&self) -> &na::Isometry3<f64> {
        &self.0
    }

    /// `anchor⁻¹ · pose`, composed as a single rigid transform.
    pub fn relative(&self, pose: &Pose) -> RelativePose {
        RelativePose(self.0.inverse() * pose.transform)
    }

    pub fn to_world(&self, relative: &RelativePose) -> na::Isometry3<f64> {
        self.0 * relative.0
    }
}

/// A pose expressed in the anchor frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativePose(na::Isometry3<f64>);

impl RelativePose {
    pub fn isometry(&self) -> &na::Isometry3<f64> {
        &self.0
    }

    pub fn position(&self) -> na::Vector3<f64> {
        self.0.translation.vector
    }

    pub fn orientation(&self) -> na::UnitQuaternion<f64> {
        self.0.rotation
    }

    /// (roll, pitch, yaw) in radians.
    pub fn euler_angles(&self) -> (f64, f64, f64) {
        self.0.rotation.euler_angles()
    }

    pub fn display_position(&self) -> glam::Vec3 {
        let p = self.position();
        glam::Vec3::new(p.x as f32, p.y as f32, p.z as f32)
    }

    pub fn display_euler_angles(&self) -> glam::Vec3 {
        let (roll, pitch, yaw) = self.euler_angles();
        glam::Vec3::new(roll as f32, pitch as f32, yaw as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn from_matrix(k: &na::Matrix3<f64>, width: u32, height: u32) -> CameraIntrinsics {
        CameraIntrinsics {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            width,
            height,
        }
    }

    pub fn matrix(&self) -> na::Matrix3<f64> {
        na::Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }
}

/// One tick of the tracking subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub pose: Pose,
    pub intrinsics: Option<CameraIntrinsics>,
    /// Whether enough of the environment is mapped to place an anchor.
    pub scan_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub attitude: na::UnitQuaternion<f64>,
    /// rad/s
    pub rotation_rate: na::Vector3<f64>,
    pub gravity: na::Vector3<f64>,
    pub user_acceleration: na::Vector3<f64>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
    pub speed: Option<f64>,
    pub course: Option<f64>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(String);

impl MarkerId {
    pub fn new(id: impl Into<String>) -> MarkerId {
        MarkerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MarkerId {
    fn from(s: &str) -> Self {
        MarkerId(s.to_string())
    }
}

/// Small preview of a captured photo.
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail(RgbaImage);

impl Thumbnail {
    /// Downscales `img` so that its longer edge is at most `max_edge`,
    /// preserving aspect ratio.
    pub fn from_image(img: &DynamicImage, max_edge: u32) -> Thumbnail {
        Thumbnail(img.thumbnail(max_edge, max_edge).to_rgba8())
    }

    pub fn from_rgba(img: RgbaImage) -> Thumbnail {
        Thumbnail(img)
    }

    pub fn image(&self) -> &RgbaImage {
        &self.0
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }
}

/// A captured photo pinned to the anchor frame.
///
/// Geometry is fixed at construction; only the visual payload and asset
/// metadata can be replaced afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoMarker {
    id: MarkerId,
    relative: RelativePose,
    pub thumbnail: Thumbnail,
    pub timestamp: OffsetDateTime,
    pub image_path: String,
}

impl PhotoMarker {
    pub fn new(
        id: MarkerId,
        relative: RelativePose,
        thumbnail: Thumbnail,
        timestamp: OffsetDateTime,
        image_path: String,
    ) -> PhotoMarker {
        PhotoMarker {
            id,
            relative,
            thumbnail,
            timestamp,
            image_path,
        }
    }

    /// Convenience for callers that hold an anchor and a world pose.
    pub fn from_world_pose(
        id: MarkerId,
        anchor: &AnchorFrame,
        pose: &Pose,
        thumbnail: Thumbnail,
        timestamp: OffsetDateTime,
        image_path: String,
    ) -> PhotoMarker {
        PhotoMarker::new(id, anchor.relative(pose), thumbnail, timestamp, image_path)
    }

    pub fn id(&self) -> &MarkerId {
        &self.id
    }

    pub fn relative(&self) -> &RelativePose {
        &self.relative
    }

    pub fn relative_position(&self) -> na::Vector3<f64> {
        self.relative.position()
    }

    pub fn relative_orientation(&self) -> na::UnitQuaternion<f64> {
        self.relative.orientation()
    }

    pub fn metadata(&self) -> MarkerMetadata {
        MarkerMetadata::from(self)
    }

    pub(crate) fn replace_payload(&mut self, other: &PhotoMarker) {
        self.thumbnail = other.thumbnail.clone();
        self.timestamp = other.timestamp;
        self.image_path = other.image_path.clone();
    }
}

/// Serializable projection of a [`PhotoMarker`], without the thumbnail pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerMetadata {
    pub id: MarkerId,
    pub relative_position: [f64; 3],
    /// Quaternion as `[x, y, z, w]`.
    pub relative_orientation: [f64; 4],
    /// `[roll, pitch, yaw]` in radians.
    pub relative_euler_angles: [f64; 3],
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub image_path: String,
    pub thumbnail_size: (u32, u32),
}

impl From<&PhotoMarker> for MarkerMetadata {
    fn from(marker: &PhotoMarker) -> Self {
        let p = marker.relative_position();
        let q = marker.relative_orientation();
        let (roll, pitch, yaw) = marker.relative.euler_angles();
        MarkerMetadata {
            id: marker.id.clone(),
            relative_position: [p.x, p.y, p.z],
            relative_orientation: [q.i, q.j, q.k, q.w],
            relative_euler_angles: [roll, pitch, yaw],
            timestamp: marker.timestamp,
            image_path: marker.image_path.clone(),
            thumbnail_size: marker.thumbnail.dimensions(),
        }
    }
}

/// Converts a quaternion given as `[x, y, z, w]` into a unit quaternion.
/// Returns `None` for a zero quaternion.
pub fn quaternion_from_xyzw(q: [f64; 4]) -> Option<na::UnitQuaternion<f64>> {
    let raw = na::Quaternion::new(q[3], q[0], q[1], q[2]);
    if raw.norm() < 1e-9 {
        return None;
    }
    Some(na::UnitQuaternion::from_quaternion(raw))
}
