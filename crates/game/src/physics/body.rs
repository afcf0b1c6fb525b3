use glam::Vec3;

/// One touching point reported by [`PhysicsBody::check_collision`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    /// Points away from the other object, towards this body.
    pub normal: Vec3,
    /// Separation distance, negative when penetrating.
    pub distance: f32,
    /// Opaque handle of the object on the far side.
    pub other: u64,
}

/// What player movement needs from a physics body.
pub trait PhysicsBody {
    fn linear_velocity(&self) -> Vec3;
    fn set_linear_velocity(&mut self, velocity: Vec3);

    fn position(&self) -> Vec3;
    fn set_position(&mut self, position: Vec3);

    fn set_gravity_enabled(&mut self, enabled: bool);
    fn set_collision_enabled(&mut self, enabled: bool);

    /// Feeds every contact closer than `max_separation` into `collector`.
    fn check_collision(&self, max_separation: f32, collector: &mut dyn FnMut(Contact));
}
