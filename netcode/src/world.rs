//! The session's view of the game world.
//!
//! The session never owns entities. It spawns, reads, writes and destroys them
//! through [`EntityAccess`], and announces phase changes through
//! [`SessionLifecycle`]. [`HeadlessWorld`] is a self-contained implementation
//! used by the dedicated server and by tests.

use crate::session::SessionPhase;
use log::{debug, info};
use shared::{Color, PlayerInfo, Vec2, WORLD_HEIGHT, WORLD_WIDTH};
use std::collections::HashMap;

/// Opaque entity id issued by the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityHandle(pub u64);

/// Steering flags of a player entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlFlags {
    pub rotate_left: bool,
    pub rotate_right: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    pub position: Vec2,
    pub velocity: Vec2,
    /// Heading in degrees.
    pub rotation: f32,
    pub in_collision: bool,
}

pub trait EntityAccess {
    /// Creates a player entity at `position`.
    fn spawn_player(
        &mut self,
        info: &PlayerInfo,
        position: Vec2,
        locally_controlled: bool,
    ) -> EntityHandle;

    fn destroy(&mut self, entity: EntityHandle);

    fn is_alive(&self, entity: EntityHandle) -> bool;

    fn kinematics(&self, entity: EntityHandle) -> Option<Kinematics>;

    fn set_kinematics(&mut self, entity: EntityHandle, kinematics: Kinematics);

    fn controls(&self, entity: EntityHandle) -> Option<ControlFlags>;

    fn set_controls(&mut self, entity: EntityHandle, controls: ControlFlags);

    fn color(&self, entity: EntityHandle) -> Option<Color>;

    fn display_name(&self, entity: EntityHandle) -> Option<String>;
}

pub trait SessionLifecycle {
    /// Marks an entity as belonging to a phase so the world can clean it up.
    fn tag_entity(&mut self, entity: EntityHandle, phase: SessionPhase);

    /// Asks the host application to switch screens for `phase`.
    fn request_transition(&mut self, phase: SessionPhase);
}

/// Everything a session needs from its world.
pub trait GameWorld: EntityAccess + SessionLifecycle {}

impl<W: EntityAccess + SessionLifecycle + ?Sized> GameWorld for W {}

/// Turn rate of a steered player, degrees per second.
pub const TURN_RATE: f32 = 180.0;
/// Forward speed of a player, pixels per second.
pub const MOVE_SPEED: f32 = 200.0;
/// Margin keeping players inside the canvas.
pub const EDGE_MARGIN: f32 = 25.0;

#[derive(Debug, Clone)]
pub struct HeadlessEntity {
    pub info: PlayerInfo,
    pub kinematics: Kinematics,
    pub controls: ControlFlags,
    pub locally_controlled: bool,
    pub phase: Option<SessionPhase>,
}

/// In-memory world without rendering.
#[derive(Debug, Default)]
pub struct HeadlessWorld {
    entities: HashMap<EntityHandle, HeadlessEntity>,
    next_handle: u64,
    transitions: Vec<SessionPhase>,
}

impl HeadlessWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, entity: EntityHandle) -> Option<&HeadlessEntity> {
        self.entities.get(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Phases requested so far, oldest first.
    pub fn transitions(&self) -> &[SessionPhase] {
        &self.transitions
    }

    /// Steers and moves every entity forward by `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        for entity in self.entities.values_mut() {
            let k = &mut entity.kinematics;
            if entity.controls.rotate_left {
                k.rotation -= TURN_RATE * dt;
            }
            if entity.controls.rotate_right {
                k.rotation += TURN_RATE * dt;
            }
            k.rotation = k.rotation.rem_euclid(360.0);

            let heading = k.rotation.to_radians();
            k.velocity = Vec2::new(heading.cos() * MOVE_SPEED, heading.sin() * MOVE_SPEED);

            k.position.x = (k.position.x + k.velocity.x * dt)
                .clamp(EDGE_MARGIN, WORLD_WIDTH - EDGE_MARGIN);
            k.position.y = (k.position.y + k.velocity.y * dt)
                .clamp(EDGE_MARGIN, WORLD_HEIGHT - EDGE_MARGIN);
        }
    }
}

impl EntityAccess for HeadlessWorld {
    fn spawn_player(
        &mut self,
        info: &PlayerInfo,
        position: Vec2,
        locally_controlled: bool,
    ) -> EntityHandle {
        let handle = EntityHandle(self.next_handle);
        self.next_handle += 1;

        self.entities.insert(
            handle,
            HeadlessEntity {
                info: info.clone(),
                kinematics: Kinematics {
                    position,
                    ..Kinematics::default()
                },
                controls: ControlFlags::default(),
                locally_controlled,
                phase: None,
            },
        );
        info!(
            "Spawned player {} at ({}, {})",
            info.player_id, position.x, position.y
        );
        handle
    }

    fn destroy(&mut self, entity: EntityHandle) {
        if let Some(removed) = self.entities.remove(&entity) {
            debug!("Destroyed entity of player {}", removed.info.player_id);
        }
    }

    fn is_alive(&self, entity: EntityHandle) -> bool {
        self.entities.contains_key(&entity)
    }

    fn kinematics(&self, entity: EntityHandle) -> Option<Kinematics> {
        self.entities.get(&entity).map(|e| e.kinematics)
    }

    fn set_kinematics(&mut self, entity: EntityHandle, kinematics: Kinematics) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.kinematics = kinematics;
        }
    }

    fn controls(&self, entity: EntityHandle) -> Option<ControlFlags> {
        self.entities.get(&entity).map(|e| e.controls)
    }

    fn set_controls(&mut self, entity: EntityHandle, controls: ControlFlags) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.controls = controls;
        }
    }

    fn color(&self, entity: EntityHandle) -> Option<Color> {
        self.entities.get(&entity).map(|e| e.info.color)
    }

    fn display_name(&self, entity: EntityHandle) -> Option<String> {
        self.entities.get(&entity).map(|e| e.info.username.clone())
    }
}

impl SessionLifecycle for HeadlessWorld {
    fn tag_entity(&mut self, entity: EntityHandle, phase: SessionPhase) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.phase = Some(phase);
        }
    }

    fn request_transition(&mut self, phase: SessionPhase) {
        info!("Transition requested to {:?}", phase);
        self.transitions.push(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn spawn(world: &mut HeadlessWorld, position: Vec2) -> EntityHandle {
        let info = PlayerInfo::new(1, "Player_1", Color::RED);
        world.spawn_player(&info, position, true)
    }

    #[test]
    fn test_spawn_and_destroy() {
        let mut world = HeadlessWorld::new();
        let handle = spawn(&mut world, Vec2::new(100.0, 100.0));

        assert!(world.is_alive(handle));
        assert_eq!(world.color(handle), Some(Color::RED));
        assert_eq!(world.display_name(handle).as_deref(), Some("Player_1"));

        world.destroy(handle);
        assert!(!world.is_alive(handle));
        assert_eq!(world.kinematics(handle), None);
    }

    #[test]
    fn test_handles_are_unique() {
        let mut world = HeadlessWorld::new();
        let a = spawn(&mut world, Vec2::ZERO);
        world.destroy(a);
        let b = spawn(&mut world, Vec2::ZERO);
        assert_ne!(a, b);
    }

    #[test]
    fn test_advance_moves_along_heading() {
        let mut world = HeadlessWorld::new();
        let handle = spawn(&mut world, Vec2::new(640.0, 360.0));

        world.advance(0.5);
        let k = world.kinematics(handle).unwrap();
        assert_approx_eq!(k.position.x, 640.0 + MOVE_SPEED * 0.5);
        assert_approx_eq!(k.position.y, 360.0);
    }

    #[test]
    fn test_advance_turns_with_controls() {
        let mut world = HeadlessWorld::new();
        let handle = spawn(&mut world, Vec2::new(640.0, 360.0));
        world.set_controls(
            handle,
            ControlFlags {
                rotate_left: false,
                rotate_right: true,
            },
        );

        world.advance(0.5);
        assert_approx_eq!(world.kinematics(handle).unwrap().rotation, 90.0);
    }

    #[test]
    fn test_advance_stays_on_canvas() {
        let mut world = HeadlessWorld::new();
        let handle = spawn(&mut world, Vec2::new(1250.0, 360.0));

        world.advance(2.0);
        let k = world.kinematics(handle).unwrap();
        assert_approx_eq!(k.position.x, WORLD_WIDTH - EDGE_MARGIN);
    }

    #[test]
    fn test_transitions_recorded() {
        let mut world = HeadlessWorld::new();
        world.request_transition(SessionPhase::InGame);
        assert_eq!(world.transitions(), &[SessionPhase::InGame]);
    }
}
