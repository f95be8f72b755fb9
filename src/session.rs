//! Interfaces to the rest of a tracking server: device lookup, last known
//! locations, configuration and the connection replies go out on.

use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        RwLock,
    },
};

use tokio::sync::mpsc;

use crate::protocol::codec::Frame;
use crate::report::{Fix, Position};


/// Internal identifier of a provisioned device.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


pub trait DeviceRegistry: Send + Sync {
    /// Look a device up by the first candidate identifier that is known.
    fn resolve(&self, candidates: &[String]) -> Option<DeviceId>;
}

pub trait LastFixProvider: Send + Sync {
    fn last_fix(&self, device: DeviceId) -> Option<Fix>;
}

pub trait ServerConfig: Send + Sync {
    /// Configured `host:port` devices of `protocol` should report to.
    fn server_address(&self, protocol: &str) -> Option<String>;
}

/// The live connection a frame arrived on.
pub trait AckChannel {
    fn local_addr(&self) -> SocketAddr;

    /// Queue a reply to `remote`. Never waits for delivery.
    fn send(&mut self, frame: Frame, remote: SocketAddr);
}


/// Replies for a TCP connection, handed to the task that owns the socket's write half.
pub struct ConnectionChannel {
    local: SocketAddr,
    replies: mpsc::UnboundedSender<Frame>,
}

impl ConnectionChannel {
    pub fn new(local: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (replies, replies_recv) = mpsc::unbounded_channel();
        (Self { local, replies }, replies_recv)
    }
}

impl AckChannel for ConnectionChannel {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn send(&mut self, frame: Frame, remote: SocketAddr) {
        // a TCP connection only ever replies to its own peer
        if self.replies.send(frame).is_err() {
            tracing::debug!(%remote, "connection closed, reply dropped");
        }
    }
}


#[derive(Default)]
struct Devices {
    ids: HashMap<String, DeviceId>,
    fixes: HashMap<DeviceId, Fix>,
}

/// In-memory device table, shared between connections.
#[derive(Default)]
pub struct MemoryRegistry {
    devices: RwLock<Devices>,
    next_id: AtomicU64,
    accept_unknown: bool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every identity that is looked up but not yet known.
    pub fn accepting_unknown() -> Self {
        Self {
            accept_unknown: true,
            ..Self::default()
        }
    }

    pub fn register(&self, identifier: impl Into<String>) -> DeviceId {
        let identifier = identifier.into();
        let mut devices = self.devices.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        *devices
            .ids
            .entry(identifier)
            .or_insert_with(|| DeviceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1))
    }

    /// Remember where a device was, for reports that don't say.
    pub fn record(&self, position: &Position) {
        if position.outdated {
            return;
        }

        if let Some(fix) = position.fix() {
            let mut devices = self.devices.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            devices.fixes.insert(position.device, fix);
        }
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn resolve(&self, candidates: &[String]) -> Option<DeviceId> {
        {
            let devices = self.devices.read().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(id) = candidates.iter().find_map(|candidate| devices.ids.get(candidate)) {
                return Some(*id);
            }
        }

        if self.accept_unknown {
            let identifier = candidates.first()?;
            let id = self.register(identifier.as_str());
            tracing::info!(%identifier, device = %id, "registered new device");
            return Some(id);
        }

        None
    }
}

impl LastFixProvider for MemoryRegistry {
    fn last_fix(&self, device: DeviceId) -> Option<Fix> {
        let devices = self.devices.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        devices.fixes.get(&device).copied()
    }
}


/// No configured server address; replies fall back to the local socket address.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoServerConfig;

impl ServerConfig for NoServerConfig {
    fn server_address(&self, _protocol: &str) -> Option<String> {
        None
    }
}


#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn test_resolve_tries_every_candidate() {
        let registry = MemoryRegistry::new();
        let id = registry.register("123456789012347");

        let candidates = vec!["12345678901234".to_owned(), "123456789012347".to_owned()];
        assert_eq!(registry.resolve(&candidates), Some(id));
        assert_eq!(registry.resolve(&["999".to_owned()]), None);
        assert_eq!(registry.resolve(&[]), None);
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = MemoryRegistry::new();

        let first = registry.register("1");
        assert_eq!(registry.register("1"), first);
        assert_ne!(registry.register("2"), first);
    }

    #[test]
    fn test_accepting_unknown_registers_primary_candidate() {
        let registry = MemoryRegistry::accepting_unknown();

        let id = registry.resolve(&["42".to_owned(), "421".to_owned()]).unwrap();
        assert_eq!(registry.resolve(&["42".to_owned()]), Some(id));
        assert_eq!(registry.resolve(&["421".to_owned()]), Some(DeviceId(id.0 + 1)));
        assert_eq!(registry.resolve(&[]), None);
    }

    #[test]
    fn test_records_last_fix() {
        let registry = MemoryRegistry::new();
        let device = registry.register("1");
        let time = Utc.with_ymd_and_hms(2023, 6, 15, 8, 0, 0).unwrap();

        let mut position = Position::new(device);
        position.time = Some(time);
        position.latitude = 10.0;
        position.longitude = 20.0;
        registry.record(&position);

        // seeded reports don't replace the fix they were seeded from
        let mut seeded = Position::new(device);
        seeded.seed(None);
        seeded.time = Some(time);
        registry.record(&seeded);

        assert_eq!(registry.last_fix(device), Some(Fix { time, latitude: 10.0, longitude: 20.0 }));
        assert_eq!(registry.last_fix(DeviceId(99)), None);
    }

    #[test]
    fn test_connection_channel_queues_replies() {
        let local: SocketAddr = "127.0.0.1:5009".parse().unwrap();
        let (mut channel, mut replies) = ConnectionChannel::new(local);

        let frame = Frame::new([0xff; 7], 0x0001u16, vec![0x01]);
        channel.send(frame.clone(), "10.0.0.1:40000".parse().unwrap());

        assert_eq!(channel.local_addr(), local);
        assert_eq!(replies.try_recv().unwrap(), frame);
    }
}
