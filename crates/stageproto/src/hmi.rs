//! Control-surface (HMI) vocabulary.
//!
//! Actuators are addressed two ways: by URI (`/hmi/knob1`) inside the
//! session, and by `(hardware_type, hardware_id, actuator_type, index)`
//! tuple on the serial protocol. The [`HmiSurface`] trait is the outbound
//! interface to the surface; the inbound commands are dispatched by the
//! session crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of hardware a control lives on.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HardwareType {
    Mod = 0,
    Pedal = 1,
    Touch = 2,
    Accel = 3,
    Custom = 4,
}

/// Kind of physical actuator.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActuatorType {
    Footswitch = 1,
    Knob = 2,
    Pot = 3,
}

impl HardwareType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(HardwareType::Mod),
            1 => Some(HardwareType::Pedal),
            2 => Some(HardwareType::Touch),
            3 => Some(HardwareType::Accel),
            4 => Some(HardwareType::Custom),
            _ => None,
        }
    }
}

impl ActuatorType {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(ActuatorType::Footswitch),
            2 => Some(ActuatorType::Knob),
            3 => Some(ActuatorType::Pot),
            _ => None,
        }
    }
}

/// Bank-navigation role assignable to a footswitch.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BankConfigAction {
    Nothing = 0,
    TrueBypass = 1,
    PedalboardUp = 2,
    PedalboardDown = 3,
}

/// One physical control slot on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActuatorAddr {
    pub hardware_type: HardwareType,
    pub hardware_id: u8,
    pub actuator_type: ActuatorType,
    pub actuator_index: u8,
}

impl ActuatorAddr {
    pub fn new(
        hardware_type: HardwareType,
        hardware_id: u8,
        actuator_type: ActuatorType,
        actuator_index: u8,
    ) -> Self {
        Self {
            hardware_type,
            hardware_id,
            actuator_type,
            actuator_index,
        }
    }
}

/// Bitset describing how an addressed control behaves on the surface.
///
/// `ENUMERATION` implies `SCALE_POINTS`; callers OR both in together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags(pub u16);

impl ControlFlags {
    pub const LINEAR: ControlFlags = ControlFlags(0);
    pub const BYPASS: ControlFlags = ControlFlags(1);
    pub const TAP_TEMPO: ControlFlags = ControlFlags(2);
    pub const ENUMERATION: ControlFlags = ControlFlags(4);
    pub const SCALE_POINTS: ControlFlags = ControlFlags(8);
    pub const TRIGGER: ControlFlags = ControlFlags(16);
    pub const TOGGLED: ControlFlags = ControlFlags(32);
    pub const LOGARITHMIC: ControlFlags = ControlFlags(64);
    pub const INTEGER: ControlFlags = ControlFlags(128);

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: ControlFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ControlFlags {
    type Output = ControlFlags;

    fn bitor(self, rhs: ControlFlags) -> ControlFlags {
        ControlFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ControlFlags {
    fn bitor_assign(&mut self, rhs: ControlFlags) {
        self.0 |= rhs.0;
    }
}

/// A selectable option for enumerated controls (scale points, presets).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOption {
    pub value: f32,
    pub label: String,
}

/// Full payload of a `control_add` push to the surface.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAdd {
    pub instance_id: i32,
    pub symbol: String,
    pub label: String,
    pub flags: ControlFlags,
    pub unit: String,
    pub value: f32,
    pub minimum: f32,
    pub maximum: f32,
    pub steps: i32,
    pub actuator: ActuatorAddr,
    /// How many addressings share this actuator's ring.
    pub num_controllers: usize,
    /// 1-based position of this addressing within the ring.
    pub index: usize,
    pub options: Vec<ControlOption>,
}

/// A pedalboard as listed to the surface (title plus bundle path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PedalboardEntry {
    pub title: String,
    pub bundle: String,
}

/// Outbound interface to the hardware control surface.
///
/// All methods return the surface's acknowledgement; a `false` reply means
/// the surface rejected or dropped the request. Implementations frame these
/// onto the serial protocol; tests record them.
#[async_trait]
pub trait HmiSurface: Send {
    /// Whether a surface finished its handshake and accepts pushes.
    fn initialized(&self) -> bool;

    /// Seed the surface after boot with bank/pedalboard navigation state.
    async fn initial_state(
        &mut self,
        bank_id: usize,
        pedalboard_id: usize,
        pedalboards: &[PedalboardEntry],
    ) -> bool;

    /// Assign a bank-navigation role to a footswitch.
    async fn bank_config(&mut self, actuator: ActuatorAddr, action: BankConfigAction) -> bool;

    /// Show an addressed control on an actuator slot.
    async fn control_add(&mut self, control: ControlAdd) -> bool;

    /// Remove the control for `(instance_id, symbol)`; `:all` drops every
    /// control of the instance.
    async fn control_rm(&mut self, instance_id: i32, symbol: &str) -> bool;

    /// Blank an actuator slot whose ring became empty.
    async fn control_clean(&mut self, actuator: ActuatorAddr) -> bool;

    /// Drop every control on the surface.
    async fn clear(&mut self) -> bool;

    /// Push a tuner reading.
    async fn tuner(&mut self, freq: f32, note: &str, cents: i32) -> bool;

    /// Web editor connected; surface yields navigation.
    async fn ui_connected(&mut self) -> bool;

    /// Web editor disconnected; surface resumes navigation.
    async fn ui_disconnected(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_compose() {
        let flags = ControlFlags::SCALE_POINTS | ControlFlags::ENUMERATION | ControlFlags::INTEGER;
        assert_eq!(flags.bits(), 4 | 8 | 128);
        assert!(flags.contains(ControlFlags::ENUMERATION));
        assert!(!flags.contains(ControlFlags::TOGGLED));
    }

    #[test]
    fn test_linear_is_empty() {
        let flags = ControlFlags::LINEAR;
        assert_eq!(flags.bits(), 0);
        assert!(ControlFlags::TOGGLED.contains(ControlFlags::LINEAR));
    }
}
