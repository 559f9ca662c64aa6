pub mod host;

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use reflex_core::DeviceProfile;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no attached device matches action '{0}'")]
    UnknownDevice(String),
    #[error("device '{0}' write channel closed")]
    ChannelClosed(String),
}

/// One attached microcontroller as the learning loop sees it: an id, the
/// capability ledger filled by the help protocol, the sensor sources it has
/// been observed reporting, and an outbound write channel. The transport
/// behind the channel (serial framing, reconnects) stays outside this crate.
#[derive(Debug)]
pub struct Device {
    pub id: String,
    pub actions: BTreeMap<String, Vec<String>>,
    pub sensors: Vec<String>,
    separator_in: char,
    separator_out: char,
    writer: mpsc::Sender<String>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        separator_in: char,
        separator_out: char,
        writer: mpsc::Sender<String>,
    ) -> Self {
        Device {
            id: id.into(),
            actions: BTreeMap::new(),
            sensors: Vec::new(),
            separator_in,
            separator_out,
            writer,
        }
    }

    /// Consumes one raw line from the device. Help responses update the
    /// capability ledger in place and yield nothing; ordinary readings come
    /// back tagged with the device id for the cycle engine.
    pub fn ingest(&mut self, line: &str) -> Option<String> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return None;
        }
        let mut chars = line.chars();
        if chars.next() == Some('?') && chars.next() == Some(self.separator_in) {
            self.absorb_help(chars.as_str());
            return None;
        }
        // remember single-char sources so the device table can report them
        let mut probe = line.chars();
        if let (Some(first), Some(second)) = (probe.next(), probe.next()) {
            if second == self.separator_out {
                let source = first.to_string();
                if !self.sensors.contains(&source) {
                    self.sensors.push(source);
                }
            }
        }
        Some(format!("{}.{}", self.id, line))
    }

    /// `?<k1|k2|...` lists action keys; `?<key>command` reports one known
    /// command for a key. Both are idempotent.
    fn absorb_help(&mut self, body: &str) {
        match body.split_once(self.separator_out) {
            None => {
                for key in body.split('|').filter(|key| !key.is_empty()) {
                    self.actions.entry(key.to_string()).or_default();
                }
            }
            Some((key, command)) => {
                if key.is_empty() {
                    return;
                }
                let known = self.actions.entry(key.to_string()).or_default();
                if !known.iter().any(|c| c == command) {
                    known.push(command.to_string());
                }
            }
        }
        debug!(device = %self.id, actions = self.actions.len(), "device.capabilities_updated");
    }

    pub async fn write(&self, payload: &str) -> bool {
        self.writer.send(payload.to_string()).await.is_ok()
    }

    pub fn profile(&self) -> DeviceProfile {
        DeviceProfile {
            id: self.id.clone(),
            actions: self.actions.clone(),
            sensors: self.sensors.clone(),
        }
    }
}

/// Registry of attached devices, keyed by id. Shared behind a mutex by the
/// transports (which feed lines in) and the dispatchers (which write out).
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: HashMap<String, Device>,
}

impl DeviceTable {
    pub fn new() -> Self {
        DeviceTable::default()
    }

    pub fn register(&mut self, device: Device) {
        self.devices.insert(device.id.clone(), device);
    }

    pub fn remove(&mut self, id: &str) -> Option<Device> {
        self.devices.remove(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Read-only projection for the reflection policy and dashboards,
    /// sorted by id so consumers see a stable ordering.
    pub fn profiles(&self) -> Vec<DeviceProfile> {
        let mut profiles: Vec<DeviceProfile> =
            self.devices.values().map(Device::profile).collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    /// Routes `"{deviceId}.{payload}"` to the matching device. Unknown
    /// devices are a recoverable skip for the caller.
    pub async fn dispatch(&self, action: &str) -> Result<(), DispatchError> {
        let Some((id, payload)) = action.split_once('.') else {
            return Err(DispatchError::UnknownDevice(action.to_string()));
        };
        let Some(device) = self.devices.get(id) else {
            return Err(DispatchError::UnknownDevice(action.to_string()));
        };
        if !device.write(payload).await {
            return Err(DispatchError::ChannelClosed(id.to_string()));
        }
        Ok(())
    }

    /// Writes a help-protocol probe to one device.
    pub async fn query(&self, id: &str, payload: &str) -> Result<(), DispatchError> {
        let Some(device) = self.devices.get(id) else {
            return Err(DispatchError::UnknownDevice(id.to_string()));
        };
        if !device.write(payload).await {
            return Err(DispatchError::ChannelClosed(id.to_string()));
        }
        Ok(())
    }
}
