//! Per-actuator addressing rings.
//!
//! Each hardware actuator URI owns a ring: an ordered list of addressings
//! plus a cursor. A binding appears exactly once in its actuator's ring and
//! exactly once in the owning plugin's symbol map. To avoid the two sides
//! aliasing one owned value, addressings live in a single arena keyed by
//! [`AddressingId`]; plugins and rings both store ids.
//!
//! Navigation is modular arithmetic over the ring length; the cursor always
//! stays in `0..len` for non-empty rings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stageproto::{ActuatorAddr, ActuatorType, ControlFlags, ControlOption, HardwareType};

/// Stable arena key for one addressing. Never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressingId(u64);

/// A binding from one plugin port to one actuator slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Addressing {
    pub actuator_uri: String,
    pub instance_id: i32,
    pub port: String,
    pub label: String,
    pub flags: ControlFlags,
    pub unit: String,
    pub minimum: f32,
    pub maximum: f32,
    pub steps: i32,
    pub options: Vec<ControlOption>,
}

/// Ordered bindings plus cursor for one actuator.
#[derive(Debug, Clone, Default)]
pub struct Ring {
    pub addrs: Vec<AddressingId>,
    pub idx: usize,
}

/// One physical actuator in the hardware inventory.
#[derive(Debug, Clone)]
pub struct ActuatorDesc {
    pub uri: String,
    pub addr: ActuatorAddr,
}

/// The default surface: four knobs and four footswitches on device 0.
pub fn default_hardware() -> Vec<ActuatorDesc> {
    let mut actuators = Vec::with_capacity(8);
    for i in 0..4u8 {
        actuators.push(ActuatorDesc {
            uri: format!("/hmi/knob{}", i + 1),
            addr: ActuatorAddr::new(HardwareType::Mod, 0, ActuatorType::Knob, i),
        });
        actuators.push(ActuatorDesc {
            uri: format!("/hmi/footswitch{}", i + 1),
            addr: ActuatorAddr::new(HardwareType::Mod, 0, ActuatorType::Footswitch, i),
        });
    }
    actuators
}

/// Arena of addressings plus the ring per hardware actuator.
#[derive(Debug)]
pub struct AddressingEngine {
    arena: HashMap<AddressingId, Addressing>,
    next_id: u64,
    rings: HashMap<String, Ring>,
    uri_to_hw: HashMap<String, ActuatorAddr>,
    hw_to_uri: HashMap<ActuatorAddr, String>,
}

impl AddressingEngine {
    pub fn new(hardware: &[ActuatorDesc]) -> Self {
        let mut rings = HashMap::new();
        let mut uri_to_hw = HashMap::new();
        let mut hw_to_uri = HashMap::new();

        for actuator in hardware {
            rings.insert(actuator.uri.clone(), Ring::default());
            uri_to_hw.insert(actuator.uri.clone(), actuator.addr);
            hw_to_uri.insert(actuator.addr, actuator.uri.clone());
        }

        Self {
            arena: HashMap::new(),
            next_id: 0,
            rings,
            uri_to_hw,
            hw_to_uri,
        }
    }

    /// Drop every binding, keeping the hardware inventory.
    pub fn clear(&mut self) {
        self.arena.clear();
        for ring in self.rings.values_mut() {
            ring.addrs.clear();
            ring.idx = 0;
        }
    }

    pub fn has_actuator(&self, uri: &str) -> bool {
        self.rings.contains_key(uri)
    }

    pub fn hw_for_uri(&self, uri: &str) -> Option<ActuatorAddr> {
        self.uri_to_hw.get(uri).copied()
    }

    pub fn uri_for_hw(&self, hw: ActuatorAddr) -> Option<&str> {
        self.hw_to_uri.get(&hw).map(String::as_str)
    }

    pub fn get(&self, id: AddressingId) -> Option<&Addressing> {
        self.arena.get(&id)
    }

    pub fn ring(&self, uri: &str) -> Option<&Ring> {
        self.rings.get(uri)
    }

    /// All addressing ids currently held by any ring.
    pub fn all_ids(&self) -> Vec<AddressingId> {
        let mut ids: Vec<_> = self.arena.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Ring URIs in a stable order, for serialization.
    pub fn actuator_uris(&self) -> Vec<String> {
        let mut uris: Vec<_> = self.rings.keys().cloned().collect();
        uris.sort();
        uris
    }

    /// Append a binding to its actuator's ring. The newest binding becomes
    /// the visible one (cursor moves to it). The actuator must exist.
    pub fn insert(&mut self, addressing: Addressing) -> Option<AddressingId> {
        let ring = self.rings.get_mut(&addressing.actuator_uri)?;

        let id = AddressingId(self.next_id);
        self.next_id += 1;

        ring.addrs.push(id);
        ring.idx = ring.addrs.len() - 1;
        self.arena.insert(id, addressing);
        Some(id)
    }

    /// Remove one binding, keeping its ring cursor in bounds: removing at or
    /// before the cursor pulls the cursor back one so the visible binding is
    /// unchanged where possible.
    pub fn remove(&mut self, id: AddressingId) -> Option<Addressing> {
        let addressing = self.arena.remove(&id)?;
        let ring = self.rings.get_mut(&addressing.actuator_uri)?;

        if let Some(pos) = ring.addrs.iter().position(|entry| *entry == id) {
            ring.addrs.remove(pos);
            if ring.idx >= pos && ring.idx > 0 {
                ring.idx -= 1;
            }
        }

        Some(addressing)
    }

    /// Advance the cursor, returning the now-visible addressing id. `None`
    /// means the ring is empty and the HMI slot must be cleaned.
    pub fn advance_next(&mut self, uri: &str) -> Option<AddressingId> {
        let ring = self.rings.get_mut(uri)?;
        if ring.addrs.is_empty() {
            return None;
        }
        ring.idx = (ring.idx + 1) % ring.addrs.len();
        Some(ring.addrs[ring.idx])
    }

    /// Step the cursor back, returning the now-visible addressing id.
    pub fn advance_prev(&mut self, uri: &str) -> Option<AddressingId> {
        let ring = self.rings.get_mut(uri)?;
        if ring.addrs.is_empty() {
            return None;
        }
        ring.idx = (ring.idx + ring.addrs.len() - 1) % ring.addrs.len();
        Some(ring.addrs[ring.idx])
    }

    /// The addressing currently visible on an actuator, if any.
    pub fn current(&self, uri: &str) -> Option<AddressingId> {
        let ring = self.rings.get(uri)?;
        ring.addrs.get(ring.idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addressing(uri: &str, instance_id: i32, port: &str) -> Addressing {
        Addressing {
            actuator_uri: uri.to_string(),
            instance_id,
            port: port.to_string(),
            label: port.to_string(),
            flags: ControlFlags::LINEAR,
            unit: "none".to_string(),
            minimum: 0.0,
            maximum: 1.0,
            steps: 33,
            options: Vec::new(),
        }
    }

    fn engine() -> AddressingEngine {
        AddressingEngine::new(&default_hardware())
    }

    #[test]
    fn test_insert_moves_cursor_to_newest() {
        let mut engine = engine();
        engine.insert(addressing("/hmi/knob1", 0, "gain")).unwrap();
        let second = engine.insert(addressing("/hmi/knob1", 0, "tone")).unwrap();

        let ring = engine.ring("/hmi/knob1").unwrap();
        assert_eq!(ring.addrs.len(), 2);
        assert_eq!(ring.idx, 1);
        assert_eq!(engine.current("/hmi/knob1"), Some(second));
    }

    #[test]
    fn test_insert_unknown_actuator_fails() {
        let mut engine = engine();
        assert!(engine.insert(addressing("/hmi/knob9", 0, "gain")).is_none());
    }

    #[test]
    fn test_full_cycle_returns_to_start() {
        // _address_next applied n times on a ring of size n is the identity
        let mut engine = engine();
        for port in ["a", "b", "c"] {
            engine.insert(addressing("/hmi/knob2", 0, port)).unwrap();
        }
        let start = engine.ring("/hmi/knob2").unwrap().idx;

        for _ in 0..3 {
            engine.advance_next("/hmi/knob2").unwrap();
        }
        assert_eq!(engine.ring("/hmi/knob2").unwrap().idx, start);
    }

    #[test]
    fn test_prev_is_inverse_of_next() {
        let mut engine = engine();
        for port in ["a", "b"] {
            engine.insert(addressing("/hmi/footswitch1", 0, port)).unwrap();
        }
        let start = engine.ring("/hmi/footswitch1").unwrap().idx;
        engine.advance_next("/hmi/footswitch1").unwrap();
        engine.advance_prev("/hmi/footswitch1").unwrap();
        assert_eq!(engine.ring("/hmi/footswitch1").unwrap().idx, start);
    }

    #[test]
    fn test_empty_ring_navigation_signals_clean() {
        let mut engine = engine();
        assert_eq!(engine.advance_next("/hmi/knob1"), None);
        assert_eq!(engine.advance_prev("/hmi/knob1"), None);
        assert_eq!(engine.current("/hmi/knob1"), None);
    }

    #[test]
    fn test_remove_adjusts_cursor() {
        // ring [P1, P2, P3] with cursor on P2: removing P2 leaves the cursor
        // on P1, then next lands on P3 and next again wraps to P1
        let mut engine = engine();
        let p1 = engine.insert(addressing("/hmi/knob1", 0, "p1")).unwrap();
        let p2 = engine.insert(addressing("/hmi/knob1", 0, "p2")).unwrap();
        let p3 = engine.insert(addressing("/hmi/knob1", 0, "p3")).unwrap();

        // cursor sits on p3 after the inserts; walk it back to p2
        engine.advance_prev("/hmi/knob1").unwrap();
        assert_eq!(engine.current("/hmi/knob1"), Some(p2));

        engine.remove(p2).unwrap();
        let ring = engine.ring("/hmi/knob1").unwrap();
        assert_eq!(ring.addrs, vec![p1, p3]);
        assert_eq!(ring.idx, 0);

        assert_eq!(engine.advance_next("/hmi/knob1"), Some(p3));
        assert_eq!(engine.advance_next("/hmi/knob1"), Some(p1));
    }

    #[test]
    fn test_remove_first_keeps_cursor_in_bounds() {
        let mut engine = engine();
        let p1 = engine.insert(addressing("/hmi/knob1", 0, "p1")).unwrap();
        let p2 = engine.insert(addressing("/hmi/knob1", 0, "p2")).unwrap();

        engine.advance_next("/hmi/knob1").unwrap(); // wraps to p1
        assert_eq!(engine.current("/hmi/knob1"), Some(p1));

        engine.remove(p1).unwrap();
        let ring = engine.ring("/hmi/knob1").unwrap();
        assert_eq!(ring.addrs, vec![p2]);
        assert_eq!(ring.idx, 0);
    }

    #[test]
    fn test_clear_keeps_inventory() {
        let mut engine = engine();
        engine.insert(addressing("/hmi/knob1", 0, "gain")).unwrap();
        engine.clear();

        assert!(engine.has_actuator("/hmi/knob1"));
        assert!(engine.ring("/hmi/knob1").unwrap().addrs.is_empty());
        assert!(engine.all_ids().is_empty());
    }

    #[test]
    fn test_hw_uri_maps_are_inverse() {
        let engine = engine();
        let hw = engine.hw_for_uri("/hmi/footswitch3").unwrap();
        assert_eq!(hw.actuator_type, ActuatorType::Footswitch);
        assert_eq!(hw.actuator_index, 2);
        assert_eq!(engine.uri_for_hw(hw), Some("/hmi/footswitch3"));
    }
}
