//! Statistics tracking for the session core

use chrono::{DateTime, Utc};

/// Server-wide counters
#[derive(Debug, Clone)]
pub struct ServerStatistics {
    /// Server start time
    pub start_time: DateTime<Utc>,
    /// Sessions that completed registration
    pub total_connections: u64,
    /// Nickname changes refused by a hook
    pub collisions: u64,
    /// Lines received
    pub total_messages_received: u64,
    /// Lines sent
    pub total_messages_sent: u64,
    /// Bytes received
    pub total_bytes_received: u64,
    /// Bytes sent
    pub total_bytes_sent: u64,
    /// Sessions torn down for exceeding a buffer ceiling
    pub quota_disconnects: u64,
}

impl Default for ServerStatistics {
    fn default() -> Self {
        Self {
            start_time: Utc::now(),
            total_connections: 0,
            collisions: 0,
            total_messages_received: 0,
            total_messages_sent: 0,
            total_bytes_received: 0,
            total_bytes_sent: 0,
            quota_disconnects: 0,
        }
    }
}

impl ServerStatistics {
    /// Create new statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> u64 {
        (now - self.start_time).num_seconds().max(0) as u64
    }

    /// Record a completed registration
    pub fn record_connection(&mut self) {
        self.total_connections += 1;
    }

    /// Record a refused nickname change
    pub fn record_collision(&mut self) {
        self.collisions += 1;
    }

    /// Record a line received
    pub fn record_message_received(&mut self, bytes: usize) {
        self.total_messages_received += 1;
        self.total_bytes_received += bytes as u64;
    }

    /// Record a line sent
    pub fn record_message_sent(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        self.total_messages_sent += 1;
        self.total_bytes_sent += bytes as u64;
    }

    /// Record a buffer ceiling teardown
    pub fn record_quota_disconnect(&mut self) {
        self.quota_disconnects += 1;
    }
}
