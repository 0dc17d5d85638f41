//! Player movement and room-edge detection

use glfw::Key;
use nalgebra::Vector2;
use pearl_engine::foundation::math::Rect;
use pearl_engine::prelude::*;
use pearl_engine::assets::EntityRecord;
use pearl_engine::render::texture_registry::MISSING_TEXTURE_ID;

/// Index of the sprite quad in the player's render object
const SPRITE_QUAD: usize = 0;

/// Animation played while standing still
const IDLE_ANIMATION: usize = 0;

/// Animation played while walking, when the sprite has one
const WALK_ANIMATION: usize = 1;

/// Hitbox outline tint
const HITBOX_COLOR: [f32; 4] = [0.2, 1.0, 0.4, 1.0];

/// Keys held for each direction, arrows and WASD
const UP_KEYS: [Key; 2] = [Key::Up, Key::W];
const DOWN_KEYS: [Key; 2] = [Key::Down, Key::S];
const LEFT_KEYS: [Key; 2] = [Key::Left, Key::A];
const RIGHT_KEYS: [Key; 2] = [Key::Right, Key::D];

/// Held directions for one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveInput {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl MoveInput {
    /// Sample the keyboard
    pub fn from_window(window: &Window) -> Self {
        let held = |keys: &[Key]| keys.iter().any(|&key| window.is_key_down(key));
        Self {
            up: held(&UP_KEYS),
            down: held(&DOWN_KEYS),
            left: held(&LEFT_KEYS),
            right: held(&RIGHT_KEYS),
        }
    }

    /// Unit direction of travel, zero when opposing keys cancel out
    pub fn direction(self) -> Vector2<f32> {
        let axis = |negative: bool, positive: bool| f32::from(u8::from(positive)) - f32::from(u8::from(negative));
        let direction = Vector2::new(axis(self.left, self.right), axis(self.up, self.down));
        direction.try_normalize(f32::EPSILON).unwrap_or_else(Vector2::zeros)
    }
}

/// Room edge a point has crossed, if any
///
/// Horizontal exits win over vertical ones when a corner is crossed.
pub fn exit_direction(room: &Rect<f32>, point: Vec2) -> Direction {
    if point.x < room.x {
        Direction::West
    } else if point.x >= room.x + room.w {
        Direction::East
    } else if point.y < room.y {
        Direction::North
    } else if point.y >= room.y + room.h {
        Direction::South
    } else {
        Direction::None
    }
}

/// Pull a point back inside a room
pub fn clamp_to_room(room: &Rect<f32>, point: Vec2) -> Vec2 {
    let max_x = (room.x + room.w - 1.0).max(room.x);
    let max_y = (room.y + room.h - 1.0).max(room.y);
    Vec2::new(point.x.clamp(room.x, max_x), point.y.clamp(room.y, max_y))
}

/// The player entity and its render object
pub struct Player {
    handle: RenderObjectHandle,
    position: Vec2,
    hitbox: Rect<f32>,
    speed: f32,
    walking: bool,
    has_walk_animation: bool,
}

impl Player {
    /// Spawn the player so its hitbox is centred on `center`
    #[allow(clippy::cast_possible_truncation)]
    pub fn spawn(
        renderer: &mut RenderManager,
        record: &EntityRecord,
        center: Vec2,
        now_ms: u64,
    ) -> Result<Self, RenderError> {
        let hitbox = Rect::new(
            record.hitbox.x as f32,
            record.hitbox.y as f32,
            record.hitbox.w as f32,
            record.hitbox.h as f32,
        );
        let sprite = &record.texture_dimensions;
        let position = center - Vec2::new(hitbox.x + hitbox.w / 2.0, hitbox.y + hitbox.h / 2.0);

        let info = RenderObjectLoadInfo {
            position: Vec3::new(position.x, position.y, 0.0),
            quads: vec![
                QuadLoadInfo::new(record.texture_id.clone(), Vec2::new(sprite.w, sprite.h))
                    .with_offset(Vec3::new(sprite.x, sprite.y, 0.0)),
                QuadLoadInfo::new(MISSING_TEXTURE_ID, Vec2::new(hitbox.w, hitbox.h))
                    .in_pool(PoolKind::Debug)
                    .with_offset(Vec3::new(hitbox.x, hitbox.y, 0.1))
                    .with_color(Vec4::from(HITBOX_COLOR)),
            ],
        };
        let handle = renderer.load_render_object(&info, now_ms)?;

        let has_walk_animation = renderer
            .objects()
            .textures()
            .find(&record.texture_id)
            .and_then(|id| renderer.objects().textures().get(id))
            .map_or(false, |texture| texture.animations.len() > WALK_ANIMATION);

        log::info!("Spawned player '{}' at ({:.0}, {:.0})", record.id, center.x, center.y);
        Ok(Self {
            handle,
            position,
            hitbox,
            speed: record.speed as f32,
            walking: false,
            has_walk_animation,
        })
    }

    /// World position of the hitbox centre
    pub fn center(&self) -> Vec2 {
        self.position + Vec2::new(self.hitbox.x + self.hitbox.w / 2.0, self.hitbox.y + self.hitbox.h / 2.0)
    }

    /// Move one tick's worth in the held direction
    pub fn update(&mut self, renderer: &mut RenderManager, input: MoveInput, now_ms: u64) -> Result<(), RenderError> {
        let direction = input.direction();
        let walking = direction != Vector2::zeros();
        self.position += Vec2::new(direction.x, direction.y) * self.speed;
        renderer.set_render_object_position(self.handle, Vec3::new(self.position.x, self.position.y, 0.0))?;

        if walking != self.walking && self.has_walk_animation {
            let animation = if walking { WALK_ANIMATION } else { IDLE_ANIMATION };
            renderer.set_animation(self.handle, SPRITE_QUAD, animation, now_ms)?;
        }
        self.walking = walking;
        Ok(())
    }

    /// Keep the hitbox centre inside `room`
    pub fn confine(&mut self, renderer: &mut RenderManager, room: &Rect<f32>) -> Result<(), RenderError> {
        let center = self.center();
        let clamped = clamp_to_room(room, center);
        if clamped != center {
            self.position += clamped - center;
            renderer.set_render_object_position(self.handle, Vec3::new(self.position.x, self.position.y, 0.0))?;
        }
        Ok(())
    }

    /// Remove the render object
    pub fn despawn(self, renderer: &mut RenderManager) -> Result<(), RenderError> {
        renderer.unload_render_object(self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Rect<f32> {
        Rect::new(384.0, 240.0, 384.0, 240.0)
    }

    #[test]
    fn test_exit_direction_inside_is_none() {
        assert_eq!(exit_direction(&room(), Vec2::new(500.0, 300.0)), Direction::None);
        assert_eq!(exit_direction(&room(), Vec2::new(384.0, 240.0)), Direction::None);
    }

    #[test]
    fn test_exit_direction_each_edge() {
        assert_eq!(exit_direction(&room(), Vec2::new(383.0, 300.0)), Direction::West);
        assert_eq!(exit_direction(&room(), Vec2::new(768.0, 300.0)), Direction::East);
        assert_eq!(exit_direction(&room(), Vec2::new(500.0, 239.5)), Direction::North);
        assert_eq!(exit_direction(&room(), Vec2::new(500.0, 480.0)), Direction::South);
    }

    #[test]
    fn test_exit_direction_corner_prefers_horizontal() {
        assert_eq!(exit_direction(&room(), Vec2::new(380.0, 200.0)), Direction::West);
    }

    #[test]
    fn test_clamp_to_room() {
        let clamped = clamp_to_room(&room(), Vec2::new(100.0, 1000.0));
        assert_eq!(clamped, Vec2::new(384.0, 479.0));
        assert_eq!(exit_direction(&room(), clamped), Direction::None);
    }

    #[test]
    fn test_move_input_direction() {
        let none = MoveInput::default();
        assert_eq!(none.direction(), Vector2::zeros());

        let cancel = MoveInput { left: true, right: true, ..MoveInput::default() };
        assert_eq!(cancel.direction(), Vector2::zeros());

        let right = MoveInput { right: true, ..MoveInput::default() };
        assert_eq!(right.direction(), Vector2::new(1.0, 0.0));

        let diagonal = MoveInput { up: true, left: true, ..MoveInput::default() };
        assert!((diagonal.direction().norm() - 1.0).abs() < 1e-6);
        assert!(diagonal.direction().x < 0.0 && diagonal.direction().y < 0.0);
    }
}
