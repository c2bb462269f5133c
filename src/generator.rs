//! Synthetic entry producer.
//!
//! Builds plausible-looking entries from a small catalogue of entities
//! and the actions that can happen to them. Used by the CLI to fill a
//! journal or drive an ingest server; seeded generators are reproducible.

use crate::codec::{Level, LogEntry};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};

const LEVEL_MIX: [(Level, u32); 4] = [
    (Level::Debug, 5),
    (Level::Info, 50),
    (Level::Warning, 30),
    (Level::Error, 15),
];

/// Timestamps land within this many milliseconds after the base time.
const MAX_JITTER_MS: u64 = 100_000_000;

const HOSTS: &[&str] = &["web-1", "web-2", "worker-1", "worker-2", "db-1"];

enum IdStyle {
    Alnum(usize),
    Prefixed(&'static str, usize),
    Named(&'static [&'static str]),
    Uuid,
}

struct EntityKind {
    name: &'static str,
    actions: &'static [&'static str],
    id_key: &'static str,
    id: IdStyle,
}

const ENTITIES: &[EntityKind] = &[
    EntityKind {
        name: "user",
        actions: &["registered", "logged in", "logged out unexpectedly"],
        id_key: "user_id",
        id: IdStyle::Alnum(8),
    },
    EntityKind {
        name: "service",
        actions: &["started", "latency detected", "crashed"],
        id_key: "service",
        id: IdStyle::Named(&["AuthService", "DataService", "PaymentService", "NotificationService"]),
    },
    EntityKind {
        name: "device",
        actions: &["connected", "signal weak", "disconnected"],
        id_key: "device",
        id: IdStyle::Named(&["DeviceA", "DeviceB", "SensorX", "SensorY"]),
    },
    EntityKind {
        name: "api request",
        actions: &["initiated", "returned status 404", "returned status 500", "failed"],
        id_key: "request_id",
        id: IdStyle::Uuid,
    },
    EntityKind {
        name: "transaction",
        actions: &["initiated", "processed", "failed"],
        id_key: "transaction_id",
        id: IdStyle::Alnum(10),
    },
    EntityKind {
        name: "database",
        actions: &["connection established", "query slow", "connection lost"],
        id_key: "database",
        id: IdStyle::Named(&["UserDB", "OrderDB", "AnalyticsDB", "InventoryDB"]),
    },
    EntityKind {
        name: "deployment",
        actions: &["initiated", "in progress", "aborted due to error"],
        id_key: "deployment_id",
        id: IdStyle::Prefixed("deploy-", 6),
    },
    EntityKind {
        name: "payment",
        actions: &["initiated", "authorized", "declined"],
        id_key: "payment_id",
        id: IdStyle::Prefixed("pay-", 9),
    },
    EntityKind {
        name: "session",
        actions: &["started", "active", "inactive for too long"],
        id_key: "session_id",
        id: IdStyle::Uuid,
    },
    EntityKind {
        name: "backup",
        actions: &["started", "completed", "failed"],
        id_key: "backup_id",
        id: IdStyle::Alnum(8),
    },
];

const ALNUM: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub struct EntryGenerator {
    rng: StdRng,
    base_ms: u64,
}

impl EntryGenerator {
    /// Random seed, timestamps relative to now.
    pub fn new() -> Self {
        let base_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            rng: StdRng::from_entropy(),
            base_ms,
        }
    }

    /// Same seed and base time give the same sequence.
    pub fn seeded(seed: u64, base_ms: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_ms,
        }
    }

    pub fn next_entry(&mut self) -> LogEntry {
        let level = LEVEL_MIX
            .choose_weighted(&mut self.rng, |(_, weight)| *weight)
            .map(|(level, _)| *level)
            .unwrap_or(Level::Info);
        let timestamp = self.base_ms + self.rng.gen_range(0..MAX_JITTER_MS);
        let kind = &ENTITIES[self.rng.gen_range(0..ENTITIES.len())];
        let action = kind.actions[self.rng.gen_range(0..kind.actions.len())];
        let id = self.make_id(&kind.id);
        let host = HOSTS[self.rng.gen_range(0..HOSTS.len())];

        LogEntry::new(timestamp, level, format!("{} {} {}", kind.name, id, action))
            .with_property("host", host)
            .with_property("entity", kind.name)
            .with_property("action", action)
            .with_property(kind.id_key, id)
    }

    fn make_id(&mut self, style: &IdStyle) -> String {
        match style {
            IdStyle::Alnum(len) => self.alnum(*len),
            IdStyle::Prefixed(prefix, len) => format!("{}{}", prefix, self.alnum(*len)),
            IdStyle::Named(names) => names
                .choose(&mut self.rng)
                .copied()
                .unwrap_or("unknown")
                .to_string(),
            IdStyle::Uuid => uuid::Builder::from_random_bytes(self.rng.gen())
                .into_uuid()
                .to_string(),
        }
    }

    fn alnum(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| ALNUM[self.rng.gen_range(0..ALNUM.len())] as char)
            .collect()
    }
}

impl Default for EntryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for EntryGenerator {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        Some(self.next_entry())
    }
}
