//! IoT thing registry.
//!
//! A "thing" is a named device capability (a lamp, a speaker volume) with
//! a descriptor schema and a current state. The service discovers things
//! through their descriptors and mutates them with `iot` control-message
//! commands routed here by name.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use tracing::warn;

pub trait Thing: Send + Sync {
    fn name(&self) -> &str;
    /// Schema describing the thing's properties and methods.
    fn descriptor(&self) -> serde_json::Value;
    /// Current property values.
    fn state(&self) -> serde_json::Value;
    /// Apply one command object (already name-matched to this thing).
    fn invoke(&self, command: &serde_json::Value) -> Result<()>;
}

#[derive(Default)]
pub struct ThingManager {
    things: Mutex<Vec<Box<dyn Thing>>>,
}

impl ThingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thing(&self, thing: Box<dyn Thing>) {
        self.things.lock().unwrap().push(thing);
    }

    /// JSON array of every thing's descriptor, forwarded verbatim to the
    /// transport when the audio channel opens.
    pub fn descriptors_json(&self) -> String {
        let descriptors: Vec<_> = self
            .things
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.descriptor())
            .collect();
        serde_json::Value::Array(descriptors).to_string()
    }

    /// JSON array of every thing's current state. The caller compares this
    /// byte-for-byte against the last published payload to suppress
    /// duplicates.
    pub fn states_json(&self) -> String {
        let states: Vec<_> = self
            .things
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.state())
            .collect();
        serde_json::Value::Array(states).to_string()
    }

    /// Route one command to the thing named in its `name` field.
    pub fn invoke(&self, command: &serde_json::Value) -> Result<()> {
        let name = command
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| anyhow!("command without a name: {command}"))?;

        let things = self.things.lock().unwrap();
        match things.iter().find(|t| t.name() == name) {
            Some(thing) => thing.invoke(command),
            None => {
                warn!(name, "command for unknown thing");
                Err(anyhow!("unknown thing: {name}"))
            }
        }
    }
}
