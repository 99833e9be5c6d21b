// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Recognized transport configuration options (spec.md §6, grounded on
//! `QoSTransportSettings.h`).

use crate::header::MAX_PACKET_SIZE;
use crate::scheduler::DropPolicy;
use std::collections::HashSet;

/// Quality-of-service and framing configuration for a [`crate::Transport`]
/// (spec.md §6 table).
#[derive(Debug, Clone)]
pub struct QoSSettings {
    /// Ordered `host:port` endpoints; `hosts[0]` is this participant's
    /// bind address.
    pub hosts: Vec<String>,
    /// Messages carrying a different domain are dropped.
    pub domain: String,
    pub read_threads: usize,
    pub read_thread_hertz: f64,
    /// Max buffer for sends and receives.
    pub queue_length: usize,
    pub max_fragment_size: usize,
    pub fragment_queue_length: usize,
    /// Initial TTL stamped on outgoing messages.
    pub rebroadcast_ttl: u8,
    /// Per-participant cap on rebroadcast hops.
    pub participant_rebroadcast_ttl: u8,
    /// `None` means unlimited (the original's `-1` sentinel).
    pub send_bandwidth_limit: Option<u64>,
    pub total_bandwidth_limit: Option<u64>,
    /// Latency budget in seconds; `None` means unlimited.
    pub deadline_secs: Option<u64>,
    pub packet_drop_policy: DropPolicy,
    pub trusted_peers: HashSet<String>,
    pub banned_peers: HashSet<String>,
    /// KaRL source evaluated after every accepted message. Kept as a
    /// plain string here: compiling and running it is the host
    /// application's job (`madara-karl` is a sibling crate, not a
    /// dependency of this one, to keep the wire layer independent of
    /// the expression engine).
    pub on_data_received_logic: Option<String>,
    pub slack_time_ms: u64,
    pub send_reduced_message_header: bool,
    pub no_sending: bool,
    pub no_receiving: bool,
}

impl Default for QoSSettings {
    fn default() -> Self {
        QoSSettings {
            hosts: Vec::new(),
            domain: "default".to_string(),
            read_threads: 1,
            read_thread_hertz: 20.0,
            queue_length: 1024,
            max_fragment_size: MAX_PACKET_SIZE - crate::header::FRAGMENT_HEADER_SIZE,
            fragment_queue_length: 8,
            rebroadcast_ttl: 0,
            participant_rebroadcast_ttl: 0,
            send_bandwidth_limit: None,
            total_bandwidth_limit: None,
            deadline_secs: None,
            packet_drop_policy: DropPolicy::default(),
            trusted_peers: HashSet::new(),
            banned_peers: HashSet::new(),
            on_data_received_logic: None,
            slack_time_ms: 0,
            send_reduced_message_header: false,
            no_sending: false,
            no_receiving: false,
        }
    }
}

impl QoSSettings {
    /// Origin filter applied on receive (spec.md §4.7 step 4): a peer
    /// must not be banned, and if a trusted set is configured, must be
    /// in it.
    pub fn is_trusted(&self, peer: &str) -> bool {
        if self.banned_peers.contains(peer) {
            return false;
        }
        self.trusted_peers.is_empty() || self.trusted_peers.contains(peer)
    }

    pub fn bind_address(&self) -> Option<&str> {
        self.hosts.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_trusted_set_allows_anyone_not_banned() {
        let settings = QoSSettings::default();
        assert!(settings.is_trusted("host:1"));
    }

    #[test]
    fn banned_peer_is_rejected_even_if_trusted() {
        let mut settings = QoSSettings::default();
        settings.trusted_peers.insert("host:1".to_string());
        settings.banned_peers.insert("host:1".to_string());
        assert!(!settings.is_trusted("host:1"));
    }

    #[test]
    fn nonempty_trusted_set_excludes_everyone_else() {
        let mut settings = QoSSettings::default();
        settings.trusted_peers.insert("host:1".to_string());
        assert!(settings.is_trusted("host:1"));
        assert!(!settings.is_trusted("host:2"));
    }
}
