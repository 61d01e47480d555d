//! Server-wide statistics counters

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::Protocol;

#[derive(Debug, Default, Clone, Copy)]
struct ProtocolCounters {
    opened: u64,
    closed: u64,
    messages: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sse: ProtocolCounters,
    websocket: ProtocolCounters,
    bus_messages: u64,
}

impl Counters {
    fn protocol_mut(&mut self, protocol: Protocol) -> &mut ProtocolCounters {
        match protocol {
            Protocol::Sse => &mut self.sse,
            Protocol::WebSocket => &mut self.websocket,
        }
    }
}

/// Connection and message counters shared by every connection.
///
/// All counters sit behind one small lock so a snapshot is never torn
/// between fields. The lock is never held across an await or while the
/// registry is locked.
pub struct ServerStats {
    started_at: DateTime<Utc>,
    started: Instant,
    counters: Mutex<Counters>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn with_counters<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut counters)
    }

    pub fn connection_opened(&self, protocol: Protocol) {
        self.with_counters(|c| c.protocol_mut(protocol).opened += 1);
    }

    pub fn connection_closed(&self, protocol: Protocol) {
        self.with_counters(|c| c.protocol_mut(protocol).closed += 1);
    }

    pub fn message_sent(&self, protocol: Protocol) {
        self.with_counters(|c| c.protocol_mut(protocol).messages += 1);
    }

    pub fn bus_message_received(&self) {
        self.with_counters(|c| c.bus_messages += 1);
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (sse, websocket, bus_messages) =
            self.with_counters(|c| (c.sse, c.websocket, c.bus_messages));

        StatsSnapshot {
            started_at: self.started_at,
            uptime: self.uptime(),
            sse: sse.into(),
            websocket: websocket.into(),
            bus_messages_received: bus_messages,
        }
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProtocolStats {
    /// Connections accepted since startup
    pub total: u64,
    /// Connections open right now
    pub current: u64,
    /// Data frames written
    pub messages: u64,
}

impl From<ProtocolCounters> for ProtocolStats {
    fn from(c: ProtocolCounters) -> Self {
        Self {
            total: c.opened,
            current: c.opened.saturating_sub(c.closed),
            messages: c.messages,
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub sse: ProtocolStats,
    pub websocket: ProtocolStats,
    pub bus_messages_received: u64,
}

impl StatsSnapshot {
    pub fn total_connections(&self) -> u64 {
        self.sse.total + self.websocket.total
    }

    pub fn current_connections(&self) -> u64 {
        self.sse.current + self.websocket.current
    }

    pub fn total_messages(&self) -> u64 {
        self.sse.messages + self.websocket.messages
    }

    pub fn messages_per_sec(&self) -> f64 {
        per_second(self.total_messages(), self.uptime)
    }

    pub fn connections_per_sec(&self) -> f64 {
        per_second(self.total_connections(), self.uptime)
    }

    /// Uptime rounded to whole seconds, e.g. "1h2m3s"
    pub fn uptime_display(&self) -> String {
        format_duration(self.uptime)
    }
}

fn per_second(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
