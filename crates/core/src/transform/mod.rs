use glam::{Mat4, Quat, Vec3};

/// Translation, rotation and scale of an object relative to its parent, with
/// lazily derived forward and inverse matrices.
///
/// Every mutator marks the cached matrices stale and bumps [`Transform::version`],
/// so dependants (a camera caching its combined matrix, for instance) can tell
/// a stale cache apart without sharing a dirty flag.
#[derive(Debug, Clone)]
pub struct Transform {
    translation: Vec3,
    rotation: Quat,
    scale: Vec3,
    dirty: bool,
    version: u64,
    matrix: Mat4,
    inverse: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            dirty: false,
            version: 0,
            matrix: Mat4::IDENTITY,
            inverse: Mat4::IDENTITY,
        }
    }
}

impl Transform {
    /// No translation, no rotation and a scale of one.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    /// Monotonic counter bumped by every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn scale_absolute(&mut self, scale: Vec3) -> &mut Self {
        self.scale = scale;
        self.touch()
    }

    /// Component-wise multiplies the current scale.
    pub fn scale_by(&mut self, factor: Vec3) -> &mut Self {
        self.scale *= factor;
        self.touch()
    }

    pub fn rotate_absolute(&mut self, rotation: Quat) -> &mut Self {
        self.rotation = rotation;
        self.touch()
    }

    /// Composes `rotation` after the current rotation.
    pub fn rotate_by(&mut self, rotation: Quat) -> &mut Self {
        self.rotation = (self.rotation * rotation).normalize();
        self.touch()
    }

    pub fn translate_absolute(&mut self, translation: Vec3) -> &mut Self {
        self.translation = translation;
        self.touch()
    }

    pub fn translate_by(&mut self, offset: Vec3) -> &mut Self {
        self.translation += offset;
        self.touch()
    }

    /// Forward matrix: translation * rotation * scale.
    pub fn matrix(&mut self) -> Mat4 {
        self.refresh();
        self.matrix
    }

    pub fn inverse_matrix(&mut self) -> Mat4 {
        self.refresh();
        self.inverse
    }

    /// Both matrices from a single refresh.
    pub fn matrices(&mut self) -> (Mat4, Mat4) {
        self.refresh();
        (self.matrix, self.inverse)
    }

    fn touch(&mut self) -> &mut Self {
        self.dirty = true;
        self.version += 1;
        self
    }

    fn refresh(&mut self) {
        if !self.dirty {
            return;
        }
        self.matrix =
            Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
        // Composed from the inverted factors rather than a general 4x4 inversion
        // so the scene graph can un-apply a node without accumulating drift.
        // A zero scale component yields a non-finite inverse.
        self.inverse = Mat4::from_scale(self.scale.recip())
            * Mat4::from_quat(self.rotation.conjugate())
            * Mat4::from_translation(-self.translation);
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_3;

    use super::*;

    #[test]
    fn untouched_transform_is_identity() {
        let mut transform = Transform::new();
        assert_eq!(transform.matrix(), Mat4::IDENTITY);
        assert_eq!(transform.inverse_matrix(), Mat4::IDENTITY);
        assert!(!transform.is_dirty());
    }

    #[test]
    fn matrix_times_inverse_is_identity() {
        let mut transform = Transform::new();
        transform
            .translate_absolute(Vec3::new(3.0, -2.0, 7.5))
            .rotate_by(Quat::from_rotation_y(FRAC_PI_3))
            .scale_by(Vec3::new(2.0, 0.5, 4.0))
            .rotate_by(Quat::from_axis_angle(Vec3::new(1.0, 1.0, 0.0).normalize(), 0.7))
            .translate_by(Vec3::new(-1.0, 0.25, 0.0));

        let (forward, inverse) = transform.matrices();
        assert!((forward * inverse).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!((inverse * forward).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    /// Xorshift stream of values in [0, 1) so mutation sequences are
    /// reproducible.
    struct Sequence(u32);

    impl Sequence {
        fn next(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            (self.0 >> 8) as f32 / (1u32 << 24) as f32
        }

        fn range(&mut self, low: f32, high: f32) -> f32 {
            low + (high - low) * self.next()
        }

        fn vector(&mut self, low: f32, high: f32) -> Vec3 {
            Vec3::new(
                self.range(low, high),
                self.range(low, high),
                self.range(low, high),
            )
        }

        fn rotation(&mut self) -> Quat {
            let axis = self.vector(-1.0, 1.0).try_normalize().unwrap_or(Vec3::Z);
            Quat::from_axis_angle(axis, self.range(-3.0, 3.0))
        }

        fn mutate(&mut self, transform: &mut Transform) {
            match (self.next() * 6.0) as u32 {
                0 => transform.translate_absolute(self.vector(-10.0, 10.0)),
                1 => transform.translate_by(self.vector(-2.0, 2.0)),
                2 => transform.rotate_absolute(self.rotation()),
                3 => transform.rotate_by(self.rotation()),
                4 => transform.scale_absolute(self.vector(0.25, 4.0)),
                _ => transform.scale_by(self.vector(0.5, 2.0)),
            };
        }
    }

    #[test]
    fn inverse_holds_for_mutation_sequences() {
        for seed in 1..=32u32 {
            let mut sequence = Sequence(seed.wrapping_mul(2_654_435_761));
            let mut transform = Transform::new();
            for step in 0..12 {
                sequence.mutate(&mut transform);
                // Repeated relative scaling can drift far from one.
                let scale = transform.scale().clamp(Vec3::splat(0.1), Vec3::splat(10.0));
                transform.scale_absolute(scale);

                let (forward, inverse) = transform.matrices();
                assert!(
                    (forward * inverse).abs_diff_eq(Mat4::IDENTITY, 1e-3),
                    "seed {seed} step {step}: {transform:?}"
                );
                assert!(
                    (inverse * forward).abs_diff_eq(Mat4::IDENTITY, 1e-3),
                    "seed {seed} step {step}: {transform:?}"
                );
            }
        }
    }

    #[test]
    fn absolute_setters_replace_earlier_state() {
        let mut transform = Transform::new();
        transform
            .scale_by(Vec3::new(3.0, 0.5, 2.0))
            .rotate_by(Quat::from_rotation_z(1.2))
            .scale_absolute(Vec3::new(0.5, 4.0, 1.5))
            .rotate_absolute(Quat::from_rotation_x(-0.4))
            .translate_absolute(Vec3::new(1.0, 2.0, 3.0));

        let (forward, inverse) = transform.matrices();
        let expected = Mat4::from_scale_rotation_translation(
            Vec3::new(0.5, 4.0, 1.5),
            Quat::from_rotation_x(-0.4),
            Vec3::new(1.0, 2.0, 3.0),
        );
        assert!(forward.abs_diff_eq(expected, 1e-5));
        assert!((forward * inverse).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }

    #[test]
    fn mutators_mark_dirty_and_bump_version() {
        let mut transform = Transform::new();
        let before = transform.version();
        transform.scale_absolute(Vec3::splat(2.0));
        assert!(transform.is_dirty());
        assert!(transform.version() > before);

        let matrix = transform.matrix();
        assert!(!transform.is_dirty());
        assert!(matrix.abs_diff_eq(Mat4::from_scale(Vec3::splat(2.0)), 1e-6));
    }

    #[test]
    fn relative_mutators_compose() {
        let mut transform = Transform::new();
        transform
            .translate_by(Vec3::X)
            .translate_by(Vec3::Y)
            .scale_by(Vec3::splat(2.0))
            .scale_by(Vec3::new(1.0, 3.0, 1.0));

        assert_eq!(transform.translation(), Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(transform.scale(), Vec3::new(2.0, 6.0, 2.0));

        let point = transform.matrix().transform_point3(Vec3::ONE);
        assert!(point.abs_diff_eq(Vec3::new(3.0, 7.0, 2.0), 1e-6));
    }
}
