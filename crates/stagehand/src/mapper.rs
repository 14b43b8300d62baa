//! Instance-id mapper.
//!
//! The editor and the pedalboard files speak stable string instance names
//! (`/graph/delay_1`); the engine speaks small integers. This keeps the
//! bijection, handing out ids monotonically so an id is never reused within
//! a session. `clear` is a session boundary: both maps and the counter
//! reset together.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapperError {
    #[error("unknown instance: {0}")]
    UnknownInstance(String),
    #[error("unknown instance id: {0}")]
    UnknownId(i32),
}

#[derive(Debug, Default)]
pub struct InstanceIdMapper {
    last_id: i32,
    id_map: HashMap<i32, String>,
    instance_map: HashMap<String, i32>,
}

impl InstanceIdMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the id for an instance, assigning the next free one if absent.
    pub fn get_id(&mut self, instance: &str) -> i32 {
        if let Some(id) = self.instance_map.get(instance) {
            return *id;
        }

        let id = self.last_id;
        self.last_id += 1;

        self.instance_map.insert(instance.to_string(), id);
        self.id_map.insert(id, instance.to_string());
        id
    }

    /// Get the id for an instance that must already be mapped.
    pub fn get_id_without_creating(&self, instance: &str) -> Result<i32, MapperError> {
        self.instance_map
            .get(instance)
            .copied()
            .ok_or_else(|| MapperError::UnknownInstance(instance.to_string()))
    }

    /// Get the instance name for a known id.
    pub fn get_instance(&self, id: i32) -> Result<&str, MapperError> {
        self.id_map
            .get(&id)
            .map(String::as_str)
            .ok_or(MapperError::UnknownId(id))
    }

    /// Session boundary: forget everything and restart ids at zero.
    pub fn clear(&mut self) {
        self.last_id = 0;
        self.id_map.clear();
        self.instance_map.clear();
    }
}
