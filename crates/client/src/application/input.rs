//! Operator input model
//!
//! Pure state machine turning key and pointer events into velocity commands.
//! No timers and no I/O: the velocity controller owns the publish cadence and
//! asks this model what to send.

use robodeck_protocol::Twist;

/// Maximum speeds a unit command maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedLimits {
    /// m/s for a linear command of 1.0
    pub max_linear: f64,
    /// rad/s for an angular command of 1.0
    pub max_angular: f64,
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            max_linear: 1.0,
            max_angular: 1.0,
        }
    }
}

/// Normalised drive command, both axes in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityCommand {
    pub linear: f64,
    pub angular: f64,
}

impl VelocityCommand {
    pub const STOP: Self = Self {
        linear: 0.0,
        angular: 0.0,
    };

    /// Clamps both axes to `[-1, 1]`; a non-finite axis becomes 0.
    pub fn new(linear: f64, angular: f64) -> Self {
        Self {
            linear: unit_axis(linear),
            angular: unit_axis(angular),
        }
    }

    pub fn is_stop(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }

    /// Wire message for this command under `limits`.
    pub fn scaled(&self, limits: &SpeedLimits) -> Twist {
        Twist::planar(
            self.linear * limits.max_linear,
            self.angular * limits.max_angular,
        )
    }
}

fn unit_axis(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

/// Keys the console reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveKey {
    Forward,
    Backward,
    /// Rotate counter-clockwise
    Left,
    /// Rotate clockwise
    Right,
    /// Emergency stop
    Stop,
}

impl DriveKey {
    /// Map a keyboard key (`w`, `a`, `s`, `d`, space) to a drive key.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.to_ascii_lowercase().as_str() {
            "w" => Some(DriveKey::Forward),
            "s" => Some(DriveKey::Backward),
            "a" => Some(DriveKey::Left),
            "d" => Some(DriveKey::Right),
            " " | "space" => Some(DriveKey::Stop),
            _ => None,
        }
    }

    pub fn is_direction(self) -> bool {
        !matches!(self, DriveKey::Stop)
    }
}

/// Held direction keys. Order does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeySet {
    forward: bool,
    backward: bool,
    left: bool,
    right: bool,
}

impl KeySet {
    fn slot(&mut self, key: DriveKey) -> Option<&mut bool> {
        match key {
            DriveKey::Forward => Some(&mut self.forward),
            DriveKey::Backward => Some(&mut self.backward),
            DriveKey::Left => Some(&mut self.left),
            DriveKey::Right => Some(&mut self.right),
            DriveKey::Stop => None,
        }
    }

    /// Returns true if the key was not held before.
    pub fn insert(&mut self, key: DriveKey) -> bool {
        match self.slot(key) {
            Some(held) => !std::mem::replace(held, true),
            None => false,
        }
    }

    /// Returns true if the key was held.
    pub fn remove(&mut self, key: DriveKey) -> bool {
        match self.slot(key) {
            Some(held) => std::mem::replace(held, false),
            None => false,
        }
    }

    pub fn contains(&self, key: DriveKey) -> bool {
        match key {
            DriveKey::Forward => self.forward,
            DriveKey::Backward => self.backward,
            DriveKey::Left => self.left,
            DriveKey::Right => self.right,
            DriveKey::Stop => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.forward || self.backward || self.left || self.right)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Opposing keys cancel out; diagonals are not normalised.
    pub fn command(&self) -> VelocityCommand {
        let axis = |positive: bool, negative: bool| f64::from(i8::from(positive) - i8::from(negative));
        VelocityCommand::new(
            axis(self.forward, self.backward),
            axis(self.left, self.right),
        )
    }
}

/// Joystick offset from its origin, in units of the joystick radius.
///
/// Screen convention: `x` grows to the right, `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointerVector {
    pub x: f64,
    pub y: f64,
}

impl PointerVector {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Offset in pixels from the joystick centre, normalised by its radius.
    pub fn from_offset(dx: f64, dy: f64, radius: f64) -> Self {
        if radius <= 0.0 {
            return Self::default();
        }
        Self::new(dx / radius, dy / radius).clamped()
    }

    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Project onto the unit circle at the same angle if outside it.
    ///
    /// A vector with a non-finite component collapses to the origin.
    pub fn clamped(self) -> Self {
        if !(self.x.is_finite() && self.y.is_finite()) {
            return Self::default();
        }
        if self.magnitude() <= 1.0 {
            return self;
        }
        let angle = self.y.atan2(self.x);
        Self::new(angle.cos(), angle.sin())
    }

    /// Up drives forward, left turns left.
    pub fn command(&self) -> VelocityCommand {
        let clamped = self.clamped();
        VelocityCommand::new(-clamped.y, -clamped.x)
    }
}

/// Which input source currently drives the robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputState {
    Keys(KeySet),
    Pointer {
        dragging: bool,
        vector: PointerVector,
    },
}

impl Default for InputState {
    fn default() -> Self {
        InputState::Keys(KeySet::default())
    }
}

/// Input state plus the decisions the controller acts on.
///
/// Each event returns the command to publish immediately, if any.
/// [`DriveInput::looping`] tells whether the periodic publish should run.
#[derive(Debug, Clone, Default)]
pub struct DriveInput {
    state: InputState,
    braked: bool,
}

impl DriveInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &InputState {
        &self.state
    }

    pub fn is_braked(&self) -> bool {
        self.braked
    }

    /// Whether the held keys require periodic publishing.
    pub fn looping(&self) -> bool {
        matches!(&self.state, InputState::Keys(keys) if !keys.is_empty())
    }

    /// Any input currently commanding motion.
    pub fn is_active(&self) -> bool {
        match &self.state {
            InputState::Keys(keys) => !keys.is_empty(),
            InputState::Pointer { dragging, .. } => *dragging,
        }
    }

    /// Command implied by the current state.
    pub fn current(&self) -> VelocityCommand {
        if self.braked {
            return VelocityCommand::STOP;
        }
        match &self.state {
            InputState::Keys(keys) => keys.command(),
            InputState::Pointer {
                dragging: true,
                vector,
            } => vector.command(),
            InputState::Pointer { .. } => VelocityCommand::STOP,
        }
    }

    pub fn key_down(&mut self, key: DriveKey) -> Option<VelocityCommand> {
        if key == DriveKey::Stop {
            self.reset();
            return Some(VelocityCommand::STOP);
        }
        if self.braked {
            return None;
        }

        if !matches!(self.state, InputState::Keys(_)) {
            self.state = InputState::Keys(KeySet::default());
        }
        if let InputState::Keys(keys) = &mut self.state {
            keys.insert(key);
        }
        // The periodic loop publishes on its first tick
        None
    }

    pub fn key_up(&mut self, key: DriveKey) -> Option<VelocityCommand> {
        let InputState::Keys(keys) = &mut self.state else {
            return None;
        };
        if keys.remove(key) && keys.is_empty() {
            return Some(VelocityCommand::STOP);
        }
        None
    }

    pub fn pointer_down(&mut self) -> Option<VelocityCommand> {
        if self.braked {
            return None;
        }
        let had_keys = self.looping();
        self.state = InputState::Pointer {
            dragging: true,
            vector: PointerVector::default(),
        };
        had_keys.then_some(VelocityCommand::STOP)
    }

    pub fn pointer_move(&mut self, vector: PointerVector) -> Option<VelocityCommand> {
        if self.braked {
            return None;
        }
        match &mut self.state {
            InputState::Pointer {
                dragging: true,
                vector: current,
            } => {
                *current = vector.clamped();
                Some(current.command())
            }
            _ => None,
        }
    }

    pub fn pointer_up(&mut self) -> Option<VelocityCommand> {
        match &mut self.state {
            InputState::Pointer { dragging, vector } => {
                *dragging = false;
                *vector = PointerVector::default();
                Some(VelocityCommand::STOP)
            }
            InputState::Keys(_) => None,
        }
    }

    /// Drop every held input, e.g. when the link goes away.
    pub fn release_all(&mut self) -> Option<VelocityCommand> {
        let was_active = self.is_active();
        self.reset();
        was_active.then_some(VelocityCommand::STOP)
    }

    /// Engaging releases all input and suppresses motion until released.
    pub fn set_brake(&mut self, engaged: bool) -> Option<VelocityCommand> {
        self.braked = engaged;
        if engaged {
            self.reset();
            return Some(VelocityCommand::STOP);
        }
        None
    }

    fn reset(&mut self) {
        self.state = InputState::default();
    }
}
