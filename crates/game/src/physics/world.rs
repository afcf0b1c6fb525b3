use glam::Vec3;
use rapier3d::prelude::*;

use super::body::{Contact, PhysicsBody};

pub type BodyHandle = RigidBodyHandle;

/// Rapier world with Z up.
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    integration_parameters: IntegrationParameters,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    gravity: Vector,
}

impl PhysicsWorld {
    pub const DEFAULT_TIMESTEP: Real = 1.0 / 60.0;

    pub fn new(gravity: Real) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = Self::DEFAULT_TIMESTEP;
        integration_parameters.min_ccd_dt = Self::DEFAULT_TIMESTEP / 100.0;

        Self {
            pipeline: PhysicsPipeline::new(),
            integration_parameters,
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            gravity: Vector::new(0.0, 0.0, -gravity),
        }
    }

    pub fn set_gravity(&mut self, gravity: Real) {
        self.gravity = Vector::new(0.0, 0.0, -gravity);
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z)
    }

    pub fn set_timestep(&mut self, dt: Real) {
        self.integration_parameters.dt = dt;
        self.integration_parameters.min_ccd_dt = dt / 100.0;
    }

    pub fn step(&mut self) {
        self.pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }

    /// Upright capsule that never rotates. `position` is the capsule center.
    pub fn add_player(
        &mut self,
        position: Vec3,
        radius: Real,
        half_height: Real,
        mass: Real,
        friction: Real,
    ) -> BodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .translation(Vector::new(position.x, position.y, position.z))
            .lock_rotations()
            .ccd_enabled(true)
            .build();

        let handle = self.bodies.insert(body);

        let collider = ColliderBuilder::capsule_z(half_height, radius)
            .mass(mass)
            .friction(friction)
            .build();

        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);

        handle
    }

    pub fn add_static_box(&mut self, position: Vec3, half_extents: Vec3) -> ColliderHandle {
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .translation(Vector::new(position.x, position.y, position.z))
            .build();
        self.colliders.insert(collider)
    }

    pub fn remove_body(&mut self, handle: BodyHandle) {
        self.bodies.remove(
            handle,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn body_position(&self, handle: BodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|b| {
            let t = b.translation();
            Vec3::new(t.x, t.y, t.z)
        })
    }

    pub fn body_velocity(&self, handle: BodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|b| {
            let v = b.linvel();
            Vec3::new(v.x, v.y, v.z)
        })
    }

    /// Borrows one body through the [`PhysicsBody`] boundary.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<RapierBody<'_>> {
        if !self.bodies.contains(handle) {
            return None;
        }
        Some(RapierBody {
            world: self,
            handle,
        })
    }
}

pub struct RapierBody<'a> {
    world: &'a mut PhysicsWorld,
    handle: BodyHandle,
}

impl RapierBody<'_> {
    pub fn handle(&self) -> BodyHandle {
        self.handle
    }

    fn collider_handles(&self) -> Vec<ColliderHandle> {
        self.world
            .bodies
            .get(self.handle)
            .map(|b| b.colliders().to_vec())
            .unwrap_or_default()
    }
}

fn pack_collider(handle: ColliderHandle) -> u64 {
    let (index, generation) = handle.into_raw_parts();
    ((generation as u64) << 32) | index as u64
}

impl PhysicsBody for RapierBody<'_> {
    fn linear_velocity(&self) -> Vec3 {
        self.world.body_velocity(self.handle).unwrap_or_default()
    }

    fn set_linear_velocity(&mut self, velocity: Vec3) {
        if let Some(body) = self.world.bodies.get_mut(self.handle) {
            body.set_linvel(Vector::new(velocity.x, velocity.y, velocity.z), true);
        }
    }

    fn position(&self) -> Vec3 {
        self.world.body_position(self.handle).unwrap_or_default()
    }

    fn set_position(&mut self, position: Vec3) {
        if let Some(body) = self.world.bodies.get_mut(self.handle) {
            let current_rot = *body.rotation();
            let new_pose =
                Pose::from_parts(Vector::new(position.x, position.y, position.z), current_rot);
            body.set_position(new_pose, true);
        }
    }

    fn set_gravity_enabled(&mut self, enabled: bool) {
        if let Some(body) = self.world.bodies.get_mut(self.handle) {
            body.set_gravity_scale(if enabled { 1.0 } else { 0.0 }, true);
        }
    }

    fn set_collision_enabled(&mut self, enabled: bool) {
        for handle in self.collider_handles() {
            if let Some(collider) = self.world.colliders.get_mut(handle) {
                collider.set_enabled(enabled);
            }
        }
    }

    fn check_collision(&self, max_separation: f32, collector: &mut dyn FnMut(Contact)) {
        for collider in self.collider_handles() {
            for pair in self.world.narrow_phase.contact_pairs_with(collider) {
                // manifold normals point from collider1 to collider2
                let (other, sign) = if pair.collider1 == collider {
                    (pair.collider2, -1.0)
                } else {
                    (pair.collider1, 1.0)
                };

                for manifold in &pair.manifolds {
                    let n = manifold.data.normal;
                    let normal = Vec3::new(n.x, n.y, n.z) * sign;

                    for point in &manifold.points {
                        if point.dist > max_separation {
                            continue;
                        }
                        collector(Contact {
                            normal,
                            distance: point.dist,
                            other: pack_collider(other),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_floor() -> PhysicsWorld {
        let mut world = PhysicsWorld::new(800.0);
        world.add_static_box(Vec3::new(0.0, 0.0, -8.0), Vec3::new(512.0, 512.0, 8.0));
        world
    }

    fn spawn(world: &mut PhysicsWorld) -> BodyHandle {
        world.add_player(Vec3::new(0.0, 0.0, 40.0), 16.0, 20.0, 200.0, 0.01)
    }

    #[test]
    fn lands_on_floor() {
        let mut world = world_with_floor();
        let player = spawn(&mut world);

        for _ in 0..120 {
            world.step();
        }

        let pos = world.body_position(player).unwrap();
        assert!((pos.z - 36.0).abs() < 2.0, "resting at {pos}");

        let body = world.body_mut(player).unwrap();
        let mut normals = Vec::new();
        body.check_collision(1.0, &mut |c| normals.push(c.normal));
        assert!(!normals.is_empty());
        assert!(normals.iter().all(|n| n.z > 0.9), "{normals:?}");
    }

    #[test]
    fn gravity_toggle() {
        let mut world = world_with_floor();
        let player = spawn(&mut world);
        world.body_mut(player).unwrap().set_gravity_enabled(false);

        for _ in 0..30 {
            world.step();
        }

        assert!((world.body_position(player).unwrap().z - 40.0).abs() < 1e-3);
    }

    #[test]
    fn noclip_passes_through_floor() {
        let mut world = world_with_floor();
        let player = spawn(&mut world);
        let mut body = world.body_mut(player).unwrap();
        body.set_collision_enabled(false);
        body.set_gravity_enabled(false);
        body.set_linear_velocity(Vec3::new(0.0, 0.0, -100.0));

        for _ in 0..60 {
            world.step();
        }

        // below the bottom face of the floor box
        let z = world.body_position(player).unwrap().z;
        assert!(z < -16.0, "stopped at z={z}");
    }

    #[test]
    fn velocity_and_position_round_trip() {
        let mut world = world_with_floor();
        let player = spawn(&mut world);
        let mut body = world.body_mut(player).unwrap();
        body.set_linear_velocity(Vec3::new(10.0, 0.0, 0.0));
        body.set_position(Vec3::new(5.0, 5.0, 100.0));
        assert_eq!(body.linear_velocity(), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(body.position(), Vec3::new(5.0, 5.0, 100.0));

        world.remove_body(player);
        assert!(world.body_mut(player).is_none());
    }
}
