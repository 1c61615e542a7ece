//! Shapes whose entire definition fits the create message: identity and
//! transform only, with the geometry implied by the type.
//!
//! Dimensions ride in the attribute fields by convention: a sphere's radius
//! is its scale, a cylinder's length its Z scale, an arrow points along its
//! rotated Z axis with length in Z scale.

use sceneframe_proto::RoutingId;

use super::{Shape, ShapeCore};

macro_rules! simple_shape {
    ($(#[$meta:meta])* $name:ident => $routing:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub struct $name {
            core: ShapeCore,
        }

        impl $name {
            /// Create with the given id (zero for transient) and identity
            /// attributes.
            #[must_use]
            pub fn new(id: u32) -> Self {
                Self { core: ShapeCore::new(id) }
            }

            /// Replace the core wholesale; useful when composing from
            /// decoded messages.
            #[must_use]
            pub fn with_core(core: ShapeCore) -> Self {
                Self { core }
            }
        }

        impl Shape for $name {
            fn routing_id(&self) -> u16 {
                RoutingId::$routing.to_u16()
            }

            fn core(&self) -> &ShapeCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut ShapeCore {
                &mut self.core
            }
        }
    };
}

simple_shape!(
    /// A sphere; radius in the scale fields.
    Sphere => Sphere
);
simple_shape!(
    /// An axis-aligned box before rotation; extents in the scale fields.
    Cuboid => Box
);
simple_shape!(
    /// A cone opening along Z; apex angle from the X/Y scale over length.
    Cone => Cone
);
simple_shape!(
    /// A cylinder along Z; radius in X/Y scale, length in Z scale.
    Cylinder => Cylinder
);
simple_shape!(
    /// A capsule along Z; radius in X/Y scale, length in Z scale.
    Capsule => Capsule
);
simple_shape!(
    /// A quad patch; facing from rotation, extents in scale.
    Plane => Plane
);
simple_shape!(
    /// A star marker; radius in the scale fields.
    Star => Star
);
simple_shape!(
    /// An arrow along the rotated Z axis; length in Z scale, radius in X/Y.
    Arrow => Arrow
);
simple_shape!(
    /// A set of coloured axes (XYZ as RGB) representing an orientation.
    Pose => Pose
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_ids_are_distinct_and_in_the_shape_band() {
        let ids = [
            Sphere::new(1).routing_id(),
            Cuboid::new(1).routing_id(),
            Cone::new(1).routing_id(),
            Cylinder::new(1).routing_id(),
            Capsule::new(1).routing_id(),
            Plane::new(1).routing_id(),
            Star::new(1).routing_id(),
            Arrow::new(1).routing_id(),
            Pose::new(1).routing_id(),
        ];
        for (i, a) in ids.iter().enumerate() {
            assert!(*a >= sceneframe_proto::SHAPE_ID_START);
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn transient_shapes_have_id_zero() {
        assert!(Sphere::new(0).core().is_transient());
        assert!(!Sphere::new(3).core().is_transient());
    }
}
