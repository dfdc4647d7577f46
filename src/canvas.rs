//! Spatial canvas: the anchor frame, one scene node per captured photo and
//! the reticle that previews where the next photo would land.
//!
//! Everything here is pure geometry. Positions are stored relative to the
//! anchor so markers stay put when tracking re-estimates its world origin;
//! world transforms on the nodes are derived from the anchor for rendering.

use std::sync::Weak;

use log::{debug, trace};
use nalgebra as na;

use crate::error::CanvasError;
use crate::types::{AnchorFrame, MarkerId, PhotoMarker, Pose, RelativePose};

/// Notified after every change to the marker set.
pub trait CanvasObserver {
    fn on_markers_changed(&self, markers: &[PhotoMarker]);
}

#[derive(Debug, Clone)]
pub struct MarkerNode {
    pub marker: PhotoMarker,
    /// `anchor · relative`, fixed when the node is created.
    pub world_transform: na::Isometry3<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct Reticle {
    pub relative: Option<RelativePose>,
    pub world_transform: Option<na::Isometry3<f64>>,
    pub visible: bool,
}

#[derive(Default)]
pub struct SpatialCanvas {
    anchor: Option<AnchorFrame>,
    nodes: Vec<MarkerNode>,
    reticle: Reticle,
    observer: Option<Weak<dyn CanvasObserver>>,
}

impl SpatialCanvas {
    pub fn new() -> SpatialCanvas {
        SpatialCanvas::default()
    }

    /// Registers the single observer. The canvas does not keep it alive.
    pub fn set_observer(&mut self, observer: Weak<dyn CanvasObserver>) {
        self.observer = Some(observer);
    }

    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    pub fn anchor(&self) -> Option<&AnchorFrame> {
        self.anchor.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn initialize_anchor(&mut self, anchor: AnchorFrame) -> Result<(), CanvasError> {
        if self.anchor.is_some() {
            debug!("ignoring anchor initialization, canvas already anchored");
            return Err(CanvasError::AlreadyInitialized);
        }
        debug!(
            "canvas anchored at {:?}",
            anchor.world_transform().translation.vector.as_slice()
        );
        self.anchor = Some(anchor);
        Ok(())
    }

    pub fn add_marker(&mut self, marker: PhotoMarker) -> Result<(), CanvasError> {
        let anchor = self.anchor.ok_or(CanvasError::NotInitialized)?;
        if self.contains(marker.id()) {
            return Err(CanvasError::DuplicateMarker(marker.id().clone()));
        }
        let world_transform = anchor.to_world(marker.relative());
        debug!("add marker {}", marker.id());
        self.nodes.push(MarkerNode {
            marker,
            world_transform,
        });
        self.notify();
        Ok(())
    }

    /// Replaces the thumbnail and asset metadata of an existing marker. The
    /// stored geometry is kept even if `marker` carries different coordinates.
    pub fn update_marker(&mut self, marker: &PhotoMarker) -> Result<(), CanvasError> {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.marker.id() == marker.id())
            .ok_or_else(|| CanvasError::MarkerNotFound(marker.id().clone()))?;
        if node.marker.relative() != marker.relative() {
            debug!(
                "marker {} update carries different geometry, keeping the original",
                marker.id()
            );
        }
        node.marker.replace_payload(marker);
        self.notify();
        Ok(())
    }

    /// Removes a marker. Unknown ids are a no-op; returns whether a node was removed.
    pub fn remove_marker(&mut self, id: &MarkerId) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.marker.id() != id);
        let removed = self.nodes.len() != before;
        if removed {
            debug!("removed marker {}", id);
            self.notify();
        } else {
            trace!("remove of unknown marker {} ignored", id);
        }
        removed
    }

    /// Moves the reticle to `anchor⁻¹ · pose`. Without an anchor the reticle
    /// stays hidden and `None` is returned.
    pub fn update_preview_pose(&mut self, pose: &Pose) -> Option<RelativePose> {
        let anchor = match self.anchor {
            Some(a) => a,
            None => {
                self.reticle = Reticle::default();
                return None;
            }
        };
        let relative = anchor.relative(pose);
        self.reticle = Reticle {
            relative: Some(relative),
            world_transform: Some(pose.transform),
            visible: true,
        };
        Some(relative)
    }

    /// Back to the pre-initialization state: no anchor, no markers, no reticle.
    pub fn reset(&mut self) {
        let had_markers = !self.nodes.is_empty();
        self.anchor = None;
        self.nodes.clear();
        self.reticle = Reticle::default();
        debug!("canvas reset");
        if had_markers {
            self.notify();
        }
    }

    pub fn reticle(&self) -> &Reticle {
        &self.reticle
    }

    pub fn contains(&self, id: &MarkerId) -> bool {
        self.nodes.iter().any(|n| n.marker.id() == id)
    }

    pub fn marker(&self, id: &MarkerId) -> Option<&PhotoMarker> {
        self.node(id).map(|n| &n.marker)
    }

    pub fn node(&self, id: &MarkerId) -> Option<&MarkerNode> {
        self.nodes.iter().find(|n| n.marker.id() == id)
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[MarkerNode] {
        &self.nodes
    }

    pub fn markers(&self) -> Vec<PhotoMarker> {
        self.nodes.iter().map(|n| n.marker.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn notify(&self) {
        if let Some(observer) = self.observer.as_ref().and_then(|o| o.upgrade()) {
            observer.on_markers_changed(&self.markers());
        }
    }
}
