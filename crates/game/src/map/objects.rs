use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapObjectKind {
    Ground,
    StaticBox,
    PlayerSpawn,
    PointLight,
}

#[derive(Debug, Clone)]
pub struct MapObject {
    pub kind: MapObjectKind,
    pub position: Vec3,
    pub half_extents: Vec3,
    /// Spawn yaw in degrees.
    pub yaw: f32,
}

impl MapObject {
    /// A thin slab whose top face sits at `position.z`.
    pub fn ground(position: Vec3, half_size: f32) -> Self {
        Self {
            kind: MapObjectKind::Ground,
            position: position - Vec3::new(0.0, 0.0, 8.0),
            half_extents: Vec3::new(half_size, half_size, 8.0),
            yaw: 0.0,
        }
    }

    pub fn static_box(position: Vec3, half_extents: Vec3) -> Self {
        Self {
            kind: MapObjectKind::StaticBox,
            position,
            half_extents,
            yaw: 0.0,
        }
    }

    pub fn player_spawn(position: Vec3, yaw: f32) -> Self {
        Self {
            kind: MapObjectKind::PlayerSpawn,
            position,
            half_extents: Vec3::ZERO,
            yaw,
        }
    }

    pub fn point_light(position: Vec3, radius: f32) -> Self {
        Self {
            kind: MapObjectKind::PointLight,
            position,
            half_extents: Vec3::splat(radius),
            yaw: 0.0,
        }
    }

    pub fn is_solid(&self) -> bool {
        matches!(self.kind, MapObjectKind::Ground | MapObjectKind::StaticBox)
    }
}
