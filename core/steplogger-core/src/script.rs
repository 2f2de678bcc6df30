//! Waypoint script parsing.
//!
//! The script is a single configuration value: a comma-separated list of
//! descriptors, each split by `:` into a display name and three opaque
//! attributes that are echoed verbatim into the waypoint log.
//!
//! ```text
//! Start:a:b:c,Mid:d:e:f,End:g:h:i
//! ```

use crate::config::{ConfigStore, SCRIPT_KEY};
use crate::error::{CoreError, Result};

/// Number of `:`-separated fields per descriptor, name included.
pub const DESCRIPTOR_FIELDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaypointDescriptor {
    name: String,
    attributes: [String; DESCRIPTOR_FIELDS - 1],
}

impl WaypointDescriptor {
    pub fn parse(index: usize, descriptor: &str) -> Result<Self> {
        let fields: Vec<&str> = descriptor.split(':').collect();
        match fields.as_slice() {
            [name, a, b, c] => Ok(Self {
                name: (*name).to_string(),
                attributes: [(*a).to_string(), (*b).to_string(), (*c).to_string()],
            }),
            _ => Err(CoreError::DescriptorMalformed {
                index,
                descriptor: descriptor.to_string(),
                found: fields.len(),
                expected: DESCRIPTOR_FIELDS,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Name followed by the attributes, in log order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.attributes.iter().map(String::as_str))
    }
}

/// Ordered, non-empty list of waypoints. Order defines traversal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaypointScript {
    waypoints: Vec<WaypointDescriptor>,
}

impl WaypointScript {
    /// Parses a script value. Blank descriptors (e.g. a trailing comma) are
    /// skipped; any other descriptor without exactly four fields rejects the
    /// whole script.
    pub fn parse(value: &str) -> Result<Self> {
        let waypoints = value
            .split(',')
            .map(str::trim)
            .filter(|descriptor| !descriptor.is_empty())
            .enumerate()
            .map(|(index, descriptor)| WaypointDescriptor::parse(index, descriptor))
            .collect::<Result<Vec<_>>>()?;

        if waypoints.is_empty() {
            return Err(CoreError::ScriptEmpty);
        }
        Ok(Self { waypoints })
    }

    /// Reads the script from the `counter` key.
    pub fn from_config(config: &ConfigStore) -> Result<Self> {
        let value = config.get(SCRIPT_KEY).ok_or_else(|| CoreError::ScriptMissing {
            key: SCRIPT_KEY.to_string(),
        })?;
        Self::parse(value)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WaypointDescriptor> {
        self.waypoints.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WaypointDescriptor> {
        self.waypoints.iter()
    }
}
