//! Service status monitoring.
//!
//! The share service reports its live state (connections, sessions, open
//! files) as a JSON document. The monitor polls it on a fixed interval and
//! diffs each keyed object class against what it saw last time: ids that
//! appeared produce "opened" events, ids that vanished produce "closed"
//! events built from the record captured when they appeared.

use crate::error::{Error, Result};
use crate::shell;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Default polling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// A client connection to a share.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Connection {
    pub machine: String,
    pub service: String,
}

/// An authenticated client session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Session {
    pub remote_machine: String,
    pub username: String,
}

/// A file held open over a share.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OpenFile {
    pub filename: String,
    pub service_path: String,
}

/// Live service state as reported by `smbstatus -j`.
///
/// Only the fields the tracker needs are deserialized; the status tool
/// emits plenty more.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceStatus {
    #[serde(default)]
    pub tcons: HashMap<String, Connection>,
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
    #[serde(default)]
    pub open_files: HashMap<String, OpenFile>,
}

/// Whether an event marks an object appearing or disappearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Opened,
    Closed,
}

/// One observed state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub message: String,
}

/// Objects the diff tracker can describe.
pub trait Tracked: Clone {
    /// Message for the object's first appearance.
    fn opened_message(&self, id: &str) -> String;

    /// Message for the object disappearing, built from the record captured
    /// when it appeared.
    fn closed_message(&self, id: &str) -> String;
}

impl Tracked for Connection {
    fn opened_message(&self, id: &str) -> String {
        format!(
            "Opened new connection: {} ({}) to '{}'",
            self.machine, id, self.service
        )
    }

    fn closed_message(&self, id: &str) -> String {
        format!(
            "Disconnected: {} ({}) authorized as '{}'",
            self.machine, id, self.service
        )
    }
}

impl Tracked for Session {
    fn opened_message(&self, id: &str) -> String {
        format!(
            "Created new session: {} ({}) authorized as '{}'",
            self.remote_machine, id, self.username
        )
    }

    fn closed_message(&self, id: &str) -> String {
        format!(
            "Removed session: {} ({}) authorized as '{}'",
            self.remote_machine, id, self.username
        )
    }
}

impl Tracked for OpenFile {
    fn opened_message(&self, _id: &str) -> String {
        format!(
            "Open file '{}' in '{}'",
            self.filename,
            basename(&self.service_path)
        )
    }

    fn closed_message(&self, _id: &str) -> String {
        format!(
            "Close file '{}' in '{}'",
            self.filename,
            basename(&self.service_path)
        )
    }
}

/// Last path component of a share path.
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Stored snapshot of one object class, keyed by id.
#[derive(Debug)]
pub struct Registry<T: Tracked> {
    objects: HashMap<String, T>,
}

impl<T: Tracked> Default for Registry<T> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
        }
    }
}

impl<T: Tracked> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// The stored record for `id`, if tracked.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.objects.get(id)
    }

    /// Diff a fresh snapshot against the stored one.
    ///
    /// New ids are stored and reported as opened; missing ids are dropped
    /// and reported as closed, described by the record captured at open
    /// time. Opened events come before closed events; order within each
    /// group follows snapshot iteration and is unspecified.
    pub fn track(&mut self, current: &HashMap<String, T>) -> Vec<Event> {
        let mut events = Vec::new();

        for (id, record) in current {
            if !self.objects.contains_key(id) {
                events.push(Event {
                    kind: EventKind::Opened,
                    message: record.opened_message(id),
                });
                self.objects.insert(id.clone(), record.clone());
            }
        }

        let closed: Vec<String> = self
            .objects
            .keys()
            .filter(|id| !current.contains_key(*id))
            .cloned()
            .collect();
        for id in closed {
            if let Some(record) = self.objects.remove(&id) {
                events.push(Event {
                    kind: EventKind::Closed,
                    message: record.closed_message(&id),
                });
            }
        }

        events
    }
}

/// Polls the share service and turns status snapshots into events.
#[derive(Debug, Default)]
pub struct Monitor {
    tcons: Registry<Connection>,
    sessions: Registry<Session>,
    open_files: Registry<OpenFile>,
}

impl Monitor {
    /// Create a monitor with empty registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query the status tool for a fresh snapshot.
    pub fn fetch_status(&self) -> Result<ServiceStatus> {
        let json = shell::run_capture("smbstatus", &["-j"])?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Status(format!("failed to parse service status: {}", e)))
    }

    /// One polling pass: diff all three object classes.
    ///
    /// Connections first, then sessions, then open files; within each class
    /// opened events precede closed ones.
    pub fn tick(&mut self, status: &ServiceStatus) -> Vec<Event> {
        let mut events = Vec::new();
        events.extend(self.tcons.track(&status.tcons));
        events.extend(self.sessions.track(&status.sessions));
        events.extend(self.open_files.track(&status.open_files));
        events
    }

    /// Poll forever at `interval`, printing events as they happen.
    ///
    /// A failed poll is logged and the loop moves on to the next tick;
    /// only process termination stops it.
    pub fn run(&mut self, interval: Duration) -> ! {
        loop {
            match self.fetch_status() {
                Ok(status) => {
                    for event in self.tick(&status) {
                        print_event(&event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "status poll failed");
                }
            }
            std::thread::sleep(interval);
        }
    }
}

/// Print an event with a timestamp prefix.
fn print_event(event: &Event) {
    let stamp = humantime::format_rfc3339_seconds(SystemTime::now());
    println!("[ {} ] {}", stamp, event.message);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(machine: &str, service: &str) -> Connection {
        Connection {
            machine: machine.to_string(),
            service: service.to_string(),
        }
    }

    #[test]
    fn test_new_object_emits_one_opened_event() {
        let mut registry = Registry::new();
        let current = HashMap::from([("1".to_string(), conn("10.0.0.5", "private"))]);

        let events = registry.track(&current);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Opened);
        assert!(events[0].message.contains("10.0.0.5"));
        assert!(events[0].message.contains("private"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_removed_object_emits_closed_event_with_stored_data() {
        let mut registry = Registry::new();
        registry.track(&HashMap::from([(
            "1".to_string(),
            conn("10.0.0.5", "private"),
        )]));

        // The record changes while the id persists: no events, and the
        // registry keeps the record captured at open time.
        let changed = HashMap::from([("1".to_string(), conn("10.0.0.9", "other"))]);
        assert!(registry.track(&changed).is_empty());

        let events = registry.track(&HashMap::new());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Closed);
        assert!(
            events[0].message.contains("10.0.0.5"),
            "closed message must use the open-time record: {}",
            events[0].message
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unchanged_snapshot_emits_nothing() {
        let current = HashMap::from([("1".to_string(), conn("10.0.0.5", "private"))]);
        let mut registry = Registry::new();
        registry.track(&current);

        assert!(registry.track(&current).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_opened_events_precede_closed_events() {
        let mut registry = Registry::new();
        registry.track(&HashMap::from([(
            "old".to_string(),
            conn("10.0.0.5", "private"),
        )]));

        let events = registry.track(&HashMap::from([(
            "new".to_string(),
            conn("10.0.0.6", "team"),
        )]));

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Opened);
        assert_eq!(events[1].kind, EventKind::Closed);
    }

    #[test]
    fn test_registry_keys_follow_snapshot() {
        let mut registry = Registry::new();
        registry.track(&HashMap::from([
            ("1".to_string(), conn("a", "x")),
            ("2".to_string(), conn("b", "y")),
        ]));

        registry.track(&HashMap::from([("2".to_string(), conn("b", "y"))]));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("2").is_some());
        assert!(registry.get("1").is_none());
    }

    #[test]
    fn test_open_file_messages_use_share_basename() {
        let file = OpenFile {
            filename: "report.ods".to_string(),
            service_path: "/mnt/virtual/private".to_string(),
        };
        assert_eq!(
            file.opened_message("77"),
            "Open file 'report.ods' in 'private'"
        );
        assert_eq!(
            file.closed_message("77"),
            "Close file 'report.ods' in 'private'"
        );
    }

    #[test]
    fn test_tick_orders_classes() {
        let mut monitor = Monitor::new();
        let status = ServiceStatus {
            tcons: HashMap::from([("t1".to_string(), conn("10.0.0.5", "private"))]),
            sessions: HashMap::from([(
                "s1".to_string(),
                Session {
                    remote_machine: "10.0.0.5".to_string(),
                    username: "admin".to_string(),
                },
            )]),
            open_files: HashMap::from([(
                "f1".to_string(),
                OpenFile {
                    filename: "notes.txt".to_string(),
                    service_path: "/mnt/virtual/private".to_string(),
                },
            )]),
        };

        let events = monitor.tick(&status);
        assert_eq!(events.len(), 3);
        assert!(events[0].message.contains("connection"));
        assert!(events[1].message.contains("session"));
        assert!(events[2].message.contains("Open file"));
    }

    #[test]
    fn test_status_json_ignores_extra_fields() {
        let json = r#"{
            "timestamp": "2025-05-01T10:00:00+0000",
            "version": "4.19.5",
            "smb_conf": "/etc/samba/smb.conf",
            "tcons": {
                "3219873004": {
                    "service": "private",
                    "server_id": {"pid": "1304"},
                    "machine": "10.0.0.5",
                    "connected_at": "2025-05-01T09:58:11+0000"
                }
            },
            "sessions": {},
            "open_files": {}
        }"#;

        let status: ServiceStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.tcons.len(), 1);
        assert_eq!(status.tcons["3219873004"].machine, "10.0.0.5");
        assert!(status.sessions.is_empty());
    }

    #[test]
    fn test_status_json_missing_sections_default_empty() {
        let status: ServiceStatus = serde_json::from_str("{}").unwrap();
        assert!(status.tcons.is_empty());
        assert!(status.sessions.is_empty());
        assert!(status.open_files.is_empty());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/mnt/virtual/private"), "private");
        assert_eq!(basename("private"), "private");
        assert_eq!(basename(""), "");
    }
}
