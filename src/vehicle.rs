//! Simulated vehicles: kinematic point agents following planned waypoints.

use crate::comms::{Inbox, Message};
use crate::math::{angle_difference, distance, normalize_angle, Point2d, Vector2d};
use crate::trajectory::Trajectory;
use log::debug;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Distance at which a waypoint counts as reached, in m.
const WAYPOINT_THRESHOLD: f64 = 0.5;

/// Maximum heading change per tick, in rad.
const MAX_TURN_RATE: f64 = 0.15;

/// Unique ID of a [Vehicle]. Stable for the vehicle's lifetime, and the
/// sole tie-breaker in the right-of-way protocol: the lower id wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VehicleId(pub u32);

/// A vehicle's declared short-term maneuver, broadcast to its neighbours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Straight,
    Left,
    Right,
    Yield,
    Merge,
    Stop,
}

impl Intent {
    /// The enumerated code used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Intent::Straight => 0,
            Intent::Left => 1,
            Intent::Right => 2,
            Intent::Yield => 3,
            Intent::Merge => 4,
            Intent::Stop => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Intent::Straight),
            1 => Some(Intent::Left),
            2 => Some(Intent::Right),
            3 => Some(Intent::Yield),
            4 => Some(Intent::Merge),
            5 => Some(Intent::Stop),
            _ => None,
        }
    }
}

impl Serialize for Intent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Intent::from_code(code)
            .ok_or_else(|| de::Error::invalid_value(de::Unexpected::Unsigned(code as u64), &"an intent code in 0..=5"))
    }
}

/// The conflict-resolution state of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictState {
    #[default]
    Normal,
    /// Yielding right-of-way to a higher-priority vehicle.
    Yielding,
    /// Held stationary, e.g. by a blocking obstacle or a failed route.
    Stopped,
}

/// The attributes of a vehicle, provided by the scenario input.
#[derive(Clone, Copy, Debug)]
pub struct VehicleAttributes {
    pub spawn: Point2d,
    pub destination: Point2d,
    pub heading: f64,
    pub speed: f64,
    pub preferred_speed: f64,
    /// 0.0 is very cautious, 1.0 is aggressive.
    pub aggressiveness: f64,
}

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID.
    id: VehicleId,
    /// The position in world space.
    position: Point2d,
    /// The heading in radians.
    heading: f64,
    /// The scalar speed in m/s.
    speed: f64,
    /// The maximum speed in m/s.
    max_speed: f64,
    /// The acceleration applied when speeding up, in m/s².
    acceleration: f64,
    /// The deceleration applied when slowing down, in m/s².
    deceleration: f64,
    /// The speed the vehicle drives at when unimpeded, in m/s.
    preferred_speed: f64,
    /// 0.0 is very cautious, 1.0 is aggressive.
    aggressiveness: f64,
    /// The destination position.
    destination: Point2d,
    /// The remaining waypoints to the destination.
    waypoints: Vec<Point2d>,
    /// The declared short-term maneuver.
    intent: Intent,
    /// The conflict-resolution state.
    state: ConflictState,
    /// Consecutive conflict-free ticks while yielding.
    clear_streak: u32,
    /// Set when no route to the destination exists. A stranded vehicle is
    /// excluded from the run: it stays parked and never resumes.
    stranded: bool,
    /// The most recently delivered message per sender.
    inbox: Inbox,
    /// The trajectory predicted at the start of the current tick.
    trajectory: Trajectory,
}

impl Vehicle {
    /// Creates a new vehicle from scenario attributes.
    pub(crate) fn new(id: VehicleId, attributes: &VehicleAttributes) -> Self {
        Self {
            id,
            position: attributes.spawn,
            heading: normalize_angle(attributes.heading),
            speed: attributes.speed,
            max_speed: 5.0,
            acceleration: 2.0,
            deceleration: 3.0,
            preferred_speed: attributes.preferred_speed,
            aggressiveness: attributes.aggressiveness.clamp(0.0, 1.0),
            destination: attributes.destination,
            waypoints: vec![],
            intent: Intent::Straight,
            state: ConflictState::Normal,
            clear_streak: 0,
            stranded: false,
            inbox: Inbox::new(),
            trajectory: Trajectory::default(),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The vehicle's position in world space.
    pub fn position(&self) -> Point2d {
        self.position
    }

    /// The vehicle's heading in radians, in `[0, 2π)`.
    pub fn heading(&self) -> f64 {
        self.heading
    }

    /// The vehicle's scalar speed in m/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The vehicle's velocity vector in m/s.
    pub fn velocity(&self) -> Vector2d {
        Vector2d::new(self.speed * self.heading.cos(), self.speed * self.heading.sin())
    }

    /// The speed the vehicle drives at when unimpeded.
    pub fn preferred_speed(&self) -> f64 {
        self.preferred_speed
    }

    /// The vehicle's aggressiveness, in `[0, 1]`.
    pub fn aggressiveness(&self) -> f64 {
        self.aggressiveness
    }

    /// The destination position.
    pub fn destination(&self) -> Point2d {
        self.destination
    }

    /// The remaining waypoints on the route.
    pub fn waypoints(&self) -> &[Point2d] {
        &self.waypoints
    }

    /// The declared short-term maneuver.
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// The conflict-resolution state.
    pub fn state(&self) -> ConflictState {
        self.state
    }

    /// The trajectory predicted at the start of the current tick.
    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    /// The most recently delivered message per sender.
    pub fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Whether the vehicle has arrived: no waypoints left and within the
    /// arrival threshold of its destination.
    pub fn has_arrived(&self) -> bool {
        self.waypoints.is_empty() && distance(self.position, self.destination) < WAYPOINT_THRESHOLD
    }

    /// Whether the vehicle was excluded for lack of a route.
    pub fn is_stranded(&self) -> bool {
        self.stranded
    }

    pub(crate) fn set_waypoints(&mut self, waypoints: Vec<Point2d>) {
        self.waypoints = waypoints;
    }

    /// Parks the vehicle permanently after a failed route.
    pub(crate) fn strand(&mut self) {
        self.stranded = true;
        self.speed = 0.0;
        self.state = ConflictState::Stopped;
        self.intent = Intent::Stop;
    }

    pub(crate) fn set_trajectory(&mut self, trajectory: Trajectory) {
        self.trajectory = trajectory;
    }

    pub(crate) fn set_conflict(&mut self, state: ConflictState, intent: Intent, clear_streak: u32) {
        if state != self.state {
            debug!("vehicle {:?}: {:?} -> {:?}", self.id, self.state, state);
        }
        self.state = state;
        self.intent = intent;
        self.clear_streak = clear_streak;
    }

    pub(crate) fn clear_streak(&self) -> u32 {
        self.clear_streak
    }

    /// Merges newly delivered messages into the inbox.
    /// Later deliveries from the same sender overwrite earlier ones.
    pub(crate) fn receive(&mut self, messages: Vec<Message>) {
        for message in messages {
            self.inbox.insert(message.sender, message);
        }
    }

    /// Steers toward the next waypoint, accelerates toward the target speed
    /// and integrates the position over one tick.
    ///
    /// `speed_scale` is the conflict resolver's output: the fraction of the
    /// preferred speed the vehicle may drive at this tick.
    pub(crate) fn integrate(&mut self, dt: f64, speed_scale: f64) {
        // Advance past any waypoints already reached.
        while self
            .waypoints
            .first()
            .map_or(false, |wp| distance(self.position, *wp) < WAYPOINT_THRESHOLD)
        {
            self.waypoints.remove(0);
        }

        if let Some(waypoint) = self.waypoints.first().copied() {
            self.steer_toward(waypoint);
            let target = (speed_scale * self.preferred_speed).min(self.max_speed);
            self.adjust_speed(target, dt);
            // Turning intent is declared from the remaining course change.
            if !matches!(self.intent, Intent::Yield | Intent::Merge | Intent::Stop) {
                self.intent = self.turn_intent(waypoint);
            }
        } else {
            // No route left: coast to a stop at the destination.
            self.adjust_speed(0.0, dt);
            if self.speed < 0.1 {
                self.speed = 0.0;
                self.intent = Intent::Stop;
            }
        }

        self.position += self.velocity() * dt;
    }

    /// Turns toward the target position, bounded by the maximum turn rate.
    fn steer_toward(&mut self, target: Point2d) {
        if distance(self.position, target) < 0.1 {
            return;
        }
        let bearing = (target.y - self.position.y).atan2(target.x - self.position.x);
        let diff = angle_difference(self.heading, bearing);
        let turn = diff.clamp(-MAX_TURN_RATE, MAX_TURN_RATE);
        self.heading = normalize_angle(self.heading + turn);
    }

    /// Accelerates or decelerates toward the target speed. An aggressive
    /// vehicle closes the gap to its target speed faster.
    fn adjust_speed(&mut self, target: f64, dt: f64) {
        let eagerness = 0.75 + 0.5 * self.aggressiveness;
        if self.speed < target {
            self.speed = (self.speed + eagerness * self.acceleration * dt).min(target);
        } else {
            self.speed = (self.speed - eagerness * self.deceleration * dt).max(target.max(0.0));
        }
    }

    /// Classifies the course change toward the next waypoint.
    fn turn_intent(&self, waypoint: Point2d) -> Intent {
        let bearing = (waypoint.y - self.position.y).atan2(waypoint.x - self.position.x);
        let diff = angle_difference(self.heading, bearing);
        if diff > 0.3 {
            Intent::Left
        } else if diff < -0.3 {
            Intent::Right
        } else {
            Intent::Straight
        }
    }
}
