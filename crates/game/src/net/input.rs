use glam::Vec3;

use super::protocol::{Buttons, UserCmd};

/// Edge state of a key that acts once per press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    #[default]
    Released,
    JustPressed,
    Held,
}

impl ButtonState {
    /// Advances the edge state with this tick's raw key state.
    pub fn update(self, down: bool) -> Self {
        match (self, down) {
            (_, false) => ButtonState::Released,
            (ButtonState::Released, true) => ButtonState::JustPressed,
            (_, true) => ButtonState::Held,
        }
    }
}

/// Local input sampled once per client tick.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub forward: bool,
    pub back: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub duck: bool,
    pub sprint: bool,
    pub zoom: bool,
    pub flashlight: ButtonState,
    /// Pitch, yaw, roll in degrees.
    pub view_angles: Vec3,
}

impl InputState {
    pub fn to_command(&self) -> UserCmd {
        let mut buttons = Buttons::empty();
        buttons.set(Buttons::FORWARD, self.forward);
        buttons.set(Buttons::BACK, self.back);
        buttons.set(Buttons::LEFT, self.left);
        buttons.set(Buttons::RIGHT, self.right);
        buttons.set(Buttons::JUMP, self.jump);
        buttons.set(Buttons::ZOOM, self.zoom);

        // duck wins over sprint
        if self.duck {
            buttons.insert(Buttons::DUCK);
        } else if self.sprint {
            buttons.insert(Buttons::SPRINT);
        }

        UserCmd::new(
            self.view_angles,
            buttons,
            self.flashlight == ButtonState::JustPressed,
        )
    }
}
