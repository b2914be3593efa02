use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::Transform;

/// How a camera maps view space onto clip space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    /// Foreshortening projection; `fov_y` is in radians.
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    /// Distance-preserving projection bounded by six box planes.
    Orthogonal {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh_gl(fov_y, aspect, near, far),
            Projection::Orthogonal {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh_gl(left, right, bottom, top, near, far),
        }
    }
}

/// Anything that exposes a projection and a combined view-projection matrix.
pub trait Projectable {
    fn projection_matrix(&self) -> Mat4;
    /// `projection * view`, recomputed only when either side changed.
    fn view_projection(&mut self) -> Mat4;
}

/// A virtual camera: a world transform that moves the scene into view space,
/// and a projection.
///
/// The combined matrix is cached against the version of the owned world
/// transform and a local projection version, so a camera that moves every
/// frame recomputes once per frame and a static one never does.
#[derive(Debug, Clone)]
pub struct Camera {
    /// View transform applied to the whole scene.
    pub world: Transform,
    projection: Projection,
    projection_matrix: Mat4,
    projection_version: u64,
    cached_for: Option<(u64, u64)>,
    combined: Mat4,
}

impl Camera {
    pub fn new(projection: Projection) -> Self {
        Self {
            world: Transform::new(),
            projection,
            projection_matrix: projection.matrix(),
            projection_version: 0,
            cached_for: None,
            combined: Mat4::IDENTITY,
        }
    }

    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self::new(Projection::Perspective {
            fov_y,
            aspect,
            near,
            far,
        })
    }

    pub fn orthogonal(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        Self::new(Projection::Orthogonal {
            left,
            right,
            bottom,
            top,
            near,
            far,
        })
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Replaces the projection, e.g. after a resize or a field-of-view change.
    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
        self.projection_matrix = projection.matrix();
        self.projection_version += 1;
    }

    /// Updates the aspect ratio of a perspective projection. Orthogonal
    /// projections are left untouched.
    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective {
            fov_y, near, far, ..
        } = self.projection
        {
            self.set_projection(Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            });
        }
    }

    pub fn is_stale(&self) -> bool {
        self.cached_for != Some((self.world.version(), self.projection_version))
    }
}

impl Projectable for Camera {
    fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    fn view_projection(&mut self) -> Mat4 {
        // Refreshing the world matrix first keeps its own cache coherent even
        // when the combined matrix turns out to be current.
        let view = self.world.matrix();
        let key = (self.world.version(), self.projection_version);
        if self.cached_for != Some(key) {
            self.combined = self.projection_matrix * view;
            self.cached_for = Some(key);
        }
        self.combined
    }
}
