// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The transport base and its read threads (spec.md §4.7, §5), built on
//! `std::net::UdpSocket` plus one OS thread per read thread — the same
//! one-thread-per-participant model the rest of MADARA uses, rather
//! than an async runtime (spec.md §5).

use crate::bandwidth::BandwidthMonitor;
use crate::codec::{decode_update, encode_update};
use crate::fragment::{split, FragmentMap};
use crate::header::{FragmentHeader, FullHeader, HeaderVariant, ReducedHeader, MULTIASSIGN};
use crate::scheduler::PacketScheduler;
use crate::settings::QoSSettings;
use crate::{FilterChain, Operation, TransportContext};
use log::{debug, warn};
use madara_context::{Context, Record, UpdateSettings};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Guard-clause codes matching spec.md §5's `validate_transport`.
pub mod validate {
    pub const OK: i32 = 0;
    pub const SHUTTING_DOWN: i32 = -1;
    pub const NOT_INITIALIZED: i32 = -2;
}

/// Rejection codes from the receive path (spec.md §4.7 `process_received_update`).
pub mod receive_status {
    pub const UNKNOWN_HEADER: i32 = -1;
    pub const SELF_ORIGINATED: i32 = -2;
    pub const UNTRUSTED_PEER: i32 = -3;
    pub const BANNED_PEER: i32 = -4;
    pub const WRONG_DOMAIN: i32 = -5;
    pub const DEADLINE_EXCEEDED: i32 = -6;
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Every configured host other than ourselves and the peer we just
/// heard from (spec.md §4.7 step 12, rebroadcast).
fn rebroadcast_targets(settings: &QoSSettings, originator: &str, from_addr: &str) -> Vec<std::net::SocketAddr> {
    settings
        .hosts
        .iter()
        .filter(|host| host.as_str() != originator && host.as_str() != from_addr)
        .filter_map(|host| host.parse().ok())
        .collect()
}

/// Outcome of handling one inbound datagram: how many records were
/// applied (or a negative rejection code), plus any framed rebroadcast
/// datagrams the caller should forward (spec.md §4.7 step 12).
struct RecvOutcome {
    applied: i32,
    rebroadcast: Vec<Vec<u8>>,
    reassembled_fragment: bool,
}

impl From<i32> for RecvOutcome {
    fn from(applied: i32) -> Self {
        RecvOutcome { applied, rebroadcast: Vec::new(), reassembled_fragment: false }
    }
}

/// A callback run after every accepted receive (and after every send),
/// binding settings' `on_data_received_logic` string to an actual
/// evaluator (spec.md §4.7 "On-data-received logic").
type DataReceivedHook = Arc<dyn Fn(&Context) + Send + Sync>;
type DataReceivedHookRef<'a> = &'a (dyn Fn(&Context) + Send + Sync);

/// A decoded datagram, normalized across the three header variants so
/// the receive path has one shape to work with.
struct Incoming {
    originator: Option<String>,
    domain: Option<String>,
    clock: u64,
    timestamp: u64,
    ttl: u8,
    updates_offset: usize,
}

/// Fragment-path counters, the original `Transport.cpp`'s observability
/// surface (SPEC_FULL.md "#fragment diagnostics").
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentStats {
    pub fragments_sent: u64,
    pub fragments_reassembled: u64,
    pub fragments_dropped: u64,
}

/// The per-participant network endpoint: wire codec, fragmentation,
/// filter chain, bandwidth/scheduling, and one or more read threads
/// (spec.md §4.7).
pub struct Transport {
    settings: QoSSettings,
    socket: Arc<UdpSocket>,
    context: Arc<Context>,
    filters: Arc<FilterChain>,
    send_bandwidth: Arc<BandwidthMonitor>,
    total_bandwidth: Arc<BandwidthMonitor>,
    scheduler: Arc<PacketScheduler>,
    fragments: Arc<Mutex<FragmentMap>>,
    fragments_sent: Arc<AtomicU64>,
    fragments_reassembled: Arc<AtomicU64>,
    originator: String,
    is_valid: Arc<AtomicBool>,
    shutting_down: Arc<AtomicBool>,
    read_threads: Mutex<Vec<JoinHandle<()>>>,
    on_data_received: Option<DataReceivedHook>,
}

impl Transport {
    pub fn new(context: Arc<Context>, settings: QoSSettings) -> std::io::Result<Self> {
        let bind = settings.bind_address().unwrap_or("0.0.0.0:0").to_string();
        let socket = UdpSocket::bind(&bind)?;
        socket.set_read_timeout(Some(Duration::from_secs(1)))?;
        let originator = socket.local_addr()?.to_string();

        Ok(Transport {
            originator,
            socket: Arc::new(socket),
            context,
            filters: Arc::new(FilterChain::default()),
            send_bandwidth: Arc::new(BandwidthMonitor::new(10)),
            total_bandwidth: Arc::new(BandwidthMonitor::new(10)),
            scheduler: Arc::new(PacketScheduler::new(settings.packet_drop_policy, 0)),
            fragments: Arc::new(Mutex::new(FragmentMap::new(settings.fragment_queue_length))),
            fragments_sent: Arc::new(AtomicU64::new(0)),
            fragments_reassembled: Arc::new(AtomicU64::new(0)),
            is_valid: Arc::new(AtomicBool::new(true)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            read_threads: Mutex::new(Vec::new()),
            on_data_received: None,
            settings,
        })
    }

    pub fn filters_mut(&mut self) -> &mut FilterChain {
        Arc::get_mut(&mut self.filters).expect("filters configured before read threads start")
    }

    pub fn set_on_data_received_hook(&mut self, hook: DataReceivedHook) {
        self.on_data_received = Some(hook);
    }

    /// The socket address this participant is actually bound to (useful
    /// when `hosts[0]` asked for an ephemeral port).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Fragment send/reassembly/drop counters (SPEC_FULL.md "#fragment
    /// diagnostics").
    pub fn stats(&self) -> FragmentStats {
        FragmentStats {
            fragments_sent: self.fragments_sent.load(Ordering::Relaxed),
            fragments_reassembled: self.fragments_reassembled.load(Ordering::Relaxed),
            fragments_dropped: self.fragments.lock().expect("fragment map lock poisoned").dropped(),
        }
    }

    /// `validate_transport`/`check_transport` (spec.md §5): the fast-path
    /// guard at the top of every public operation.
    pub fn validate(&self) -> i32 {
        if self.shutting_down.load(Ordering::Acquire) {
            validate::SHUTTING_DOWN
        } else if !self.is_valid.load(Ordering::Acquire) {
            validate::NOT_INITIALIZED
        } else {
            validate::OK
        }
    }

    /// Spawns `settings.read_threads` recv loops, each polling the
    /// socket with a 1-second timeout so shutdown stays responsive
    /// (spec.md §5 "Suspension points").
    pub fn start(&self) {
        if self.settings.no_receiving {
            return;
        }
        let mut handles = self.read_threads.lock().expect("read threads lock poisoned");
        for _ in 0..self.settings.read_threads.max(1) {
            let socket = self.socket.clone();
            let context = self.context.clone();
            let filters = self.filters.clone();
            let fragments = self.fragments.clone();
            let total_bandwidth = self.total_bandwidth.clone();
            let shutting_down = self.shutting_down.clone();
            let settings = self.settings.clone();
            let originator = self.originator.clone();
            let on_data_received = self.on_data_received.clone();
            let fragments_reassembled = self.fragments_reassembled.clone();

            handles.push(std::thread::spawn(move || {
                let mut buf = vec![0u8; crate::header::MAX_PACKET_SIZE];
                while !shutting_down.load(Ordering::Acquire) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, from)) => {
                            let outcome = receive_datagram(
                                &buf[..len],
                                &from.to_string(),
                                &context,
                                &filters,
                                &fragments,
                                &total_bandwidth,
                                &settings,
                                &originator,
                                on_data_received.as_deref(),
                            );
                            if outcome.applied < 0 {
                                debug!("dropped datagram from {from}: code {}", outcome.applied);
                            }
                            if outcome.reassembled_fragment {
                                fragments_reassembled.fetch_add(1, Ordering::Relaxed);
                            }
                            for datagram in outcome.rebroadcast {
                                for target in rebroadcast_targets(&settings, &originator, &from.to_string()) {
                                    if let Err(e) = socket.send_to(&datagram, target) {
                                        warn!("rebroadcast to {target} failed: {e}");
                                    }
                                }
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!("read thread recv error: {e}");
                        }
                    }
                }
            }));
        }
    }

    /// `close()` (spec.md §5): stop accepting new work and wait for
    /// every read thread to exit its current `recv`.
    pub fn close(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let mut handles = self.read_threads.lock().expect("read threads lock poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    /// `prep_send` + `send_data` (spec.md §4.7). Returns the number of
    /// bytes sent, or `0` if the packet was dropped by a QoS policy.
    pub fn send_data(&self, targets: &[std::net::SocketAddr]) -> std::io::Result<usize> {
        if self.settings.no_sending || self.validate() != validate::OK {
            return Ok(0);
        }

        let modifieds = self.context.get_modifieds();
        if modifieds.is_empty() {
            return Ok(0);
        }

        let max_quality = modifieds.values().map(|v| v.get().quality()).max().unwrap_or(0);

        let mut ctx = TransportContext::new(Operation::Sending, self.settings.domain.clone(), self.originator.clone());
        ctx.send_bandwidth = self.send_bandwidth.get_bytes_per_second(now_secs());

        if let Some(limit) = self.settings.send_bandwidth_limit {
            if self.send_bandwidth.is_violated(now_secs(), Some(limit)) {
                return Ok(0);
            }
        }
        if let Some(limit) = self.settings.total_bandwidth_limit {
            if self.total_bandwidth.is_violated(now_secs(), Some(limit)) {
                return Ok(0);
            }
        }
        if self.scheduler.should_drop() {
            return Ok(0);
        }

        let mut records: std::collections::HashMap<String, Record> =
            modifieds.into_iter().map(|(name, var_ref)| (name, var_ref.get())).collect();
        self.filters.send.apply(&mut records, &mut ctx);
        if records.is_empty() {
            return Ok(0);
        }

        let header = FullHeader {
            size: 0,
            domain: self.settings.domain.clone(),
            originator: self.originator.clone(),
            message_type: MULTIASSIGN,
            updates: records.len() as u32,
            quality: max_quality,
            clock: self.context.global_clock(),
            timestamp: now_secs(),
            ttl: self.settings.rebroadcast_ttl,
        };

        let mut updates_buf = Vec::new();
        for (name, record) in &records {
            encode_update(&mut updates_buf, name, record);
        }

        let datagrams = frame(&header, &updates_buf, self.settings.max_fragment_size, self.settings.send_reduced_message_header);
        if datagrams.len() > 1 {
            self.fragments_sent.fetch_add(datagrams.len() as u64, Ordering::Relaxed);
        }

        let mut total_bytes = 0;
        for datagram in datagrams {
            let encoded = self.filters.encode(&datagram);
            for target in targets {
                total_bytes += self.socket.send_to(&encoded, target)?;
            }
            self.send_bandwidth.add(now_secs(), encoded.len() as u64);
            self.total_bandwidth.add(now_secs(), encoded.len() as u64);
        }

        if let Some(hook) = &self.on_data_received {
            hook(&self.context);
        }

        Ok(total_bytes)
    }
}

/// Builds the header + update-list framing for one outgoing message,
/// fragmenting if it exceeds `max_fragment_size` (spec.md §4.3, §4.4).
fn frame(header: &FullHeader, updates: &[u8], max_fragment_size: usize, reduced: bool) -> Vec<Vec<u8>> {
    if header.updates == 0 {
        return Vec::new();
    }

    if updates.len() <= max_fragment_size {
        let mut buf = Vec::new();
        if reduced {
            let reduced_header = crate::header::ReducedHeader {
                size: (crate::header::REDUCED_HEADER_SIZE + updates.len()) as u64,
                updates: header.updates,
                clock: header.clock,
                timestamp: header.timestamp,
                ttl: header.ttl,
            };
            reduced_header.write(&mut buf);
        } else {
            let mut full = header.clone();
            full.size = (crate::header::FULL_HEADER_SIZE + updates.len()) as u64;
            full.write(&mut buf);
        }
        buf.extend_from_slice(updates);
        vec![buf]
    } else {
        split(header, updates, max_fragment_size)
    }
}

#[allow(clippy::too_many_arguments)]
fn receive_datagram(
    datagram: &[u8],
    from_addr: &str,
    context: &Context,
    filters: &FilterChain,
    fragments: &Mutex<FragmentMap>,
    total_bandwidth: &BandwidthMonitor,
    settings: &QoSSettings,
    self_originator: &str,
    on_data_received: Option<DataReceivedHookRef>,
) -> RecvOutcome {
    let decoded = filters.decode(datagram);
    total_bandwidth.add(now_secs(), decoded.len() as u64);

    let variant = match crate::header::identify(&decoded) {
        Ok(v) => v,
        Err(_) => return receive_status::UNKNOWN_HEADER.into(),
    };

    let incoming = match variant {
        HeaderVariant::Full => {
            let header = match FullHeader::read(&decoded) {
                Ok(h) => h,
                Err(_) => return receive_status::UNKNOWN_HEADER.into(),
            };
            Incoming {
                originator: Some(header.originator),
                domain: Some(header.domain),
                clock: header.clock,
                timestamp: header.timestamp,
                ttl: header.ttl,
                updates_offset: crate::header::FULL_HEADER_SIZE,
            }
        }
        HeaderVariant::Reduced => {
            let header = match ReducedHeader::read(&decoded) {
                Ok(h) => h,
                Err(_) => return receive_status::UNKNOWN_HEADER.into(),
            };
            // The reduced header omits originator/domain: it is meant
            // for a shared-domain, locally-trusted link, so self-origin
            // and domain checks are skipped for it (spec.md §9 open
            // question, resolved this way).
            Incoming {
                originator: None,
                domain: None,
                clock: header.clock,
                timestamp: header.timestamp,
                ttl: header.ttl,
                updates_offset: crate::header::REDUCED_HEADER_SIZE,
            }
        }
        HeaderVariant::Fragment => {
            let header = match FragmentHeader::read(&decoded) {
                Ok(h) => h,
                Err(_) => return receive_status::UNKNOWN_HEADER.into(),
            };
            let payload = &decoded[crate::header::FRAGMENT_HEADER_SIZE..];
            let reassembled = {
                let mut map = fragments.lock().expect("fragment map lock poisoned");
                map.accept(&header, payload)
            };
            match reassembled {
                None => return RecvOutcome::from(0),
                Some(updates) => {
                    debug!("reassembled fragmented message from {}", header.base.originator);
                    let mut outcome = apply_updates(
                        &updates,
                        0,
                        Some(header.base.originator.clone()),
                        Some(header.base.domain.clone()),
                        header.base.clock,
                        header.base.timestamp,
                        header.base.ttl,
                        from_addr,
                        context,
                        filters,
                        settings,
                        self_originator,
                        on_data_received,
                    );
                    outcome.reassembled_fragment = true;
                    return outcome;
                }
            }
        }
    };

    apply_updates(
        &decoded,
        incoming.updates_offset,
        incoming.originator,
        incoming.domain,
        incoming.clock,
        incoming.timestamp,
        incoming.ttl,
        from_addr,
        context,
        filters,
        settings,
        self_originator,
        on_data_received,
    )
}

#[allow(clippy::too_many_arguments)]
fn apply_updates(
    buf: &[u8],
    updates_offset: usize,
    originator: Option<String>,
    domain: Option<String>,
    clock: u64,
    timestamp: u64,
    ttl: u8,
    from_addr: &str,
    context: &Context,
    filters: &FilterChain,
    settings: &QoSSettings,
    self_originator: &str,
    on_data_received: Option<DataReceivedHookRef>,
) -> RecvOutcome {
    if let Some(originator) = &originator {
        if originator == self_originator {
            return receive_status::SELF_ORIGINATED.into();
        }
    }

    if settings.banned_peers.contains(from_addr) {
        return receive_status::BANNED_PEER.into();
    }
    if !settings.trusted_peers.is_empty() && !settings.trusted_peers.contains(from_addr) {
        return receive_status::UNTRUSTED_PEER.into();
    }

    if let Some(domain) = &domain {
        if domain != &settings.domain {
            return receive_status::WRONG_DOMAIN.into();
        }
    }

    if let Some(deadline) = settings.deadline_secs {
        if now_secs().saturating_sub(timestamp) > deadline {
            return receive_status::DEADLINE_EXCEEDED.into();
        }
    }

    let mut records = std::collections::HashMap::new();
    let mut at = updates_offset;
    while at < buf.len() {
        match decode_update(buf, &mut at) {
            Ok((name, record)) => {
                records.insert(name, record);
            }
            Err(_) => break,
        }
    }

    let mut ctx = TransportContext::new(Operation::Receiving, settings.domain.clone(), self_originator.to_string());
    filters.receive.apply(&mut records, &mut ctx);

    let mut applied = 0i32;
    let update_settings = UpdateSettings { track_local_changes: ttl > 0 };
    for (name, record) in &records {
        if context.update_record_from_external(name, record.clone(), &update_settings) == madara_context::update_status::CHANGED {
            applied += 1;
        }
    }

    if let Some(hook) = on_data_received {
        hook(context);
    }

    let mut rebroadcast = Vec::new();
    if ttl > 0 && settings.participant_rebroadcast_ttl > 0 {
        let rebroadcast_ttl = ttl.saturating_sub(1).min(settings.participant_rebroadcast_ttl);
        if rebroadcast_ttl > 0 {
            let mut rebroadcast_records = records;
            let mut rebroadcast_ctx = TransportContext::new(Operation::Rebroadcasting, settings.domain.clone(), self_originator.to_string());
            filters.rebroadcast.apply(&mut rebroadcast_records, &mut rebroadcast_ctx);

            if !rebroadcast_records.is_empty() {
                let rebroadcast_originator = originator.unwrap_or_else(|| self_originator.to_string());
                let max_quality = rebroadcast_records.values().map(|r| r.quality()).max().unwrap_or(0);
                let header = FullHeader {
                    size: 0,
                    domain: settings.domain.clone(),
                    originator: rebroadcast_originator,
                    message_type: MULTIASSIGN,
                    updates: rebroadcast_records.len() as u32,
                    quality: max_quality,
                    clock,
                    timestamp,
                    ttl: rebroadcast_ttl,
                };
                let mut updates_buf = Vec::new();
                for (name, record) in &rebroadcast_records {
                    encode_update(&mut updates_buf, name, record);
                }
                let datagrams = frame(&header, &updates_buf, settings.max_fragment_size, settings.send_reduced_message_header);
                rebroadcast = datagrams.into_iter().map(|datagram| filters.encode(&datagram)).collect();
            }
        }
    }

    RecvOutcome { applied, rebroadcast, reassembled_fragment: false }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{FULL_HEADER_SIZE, MAX_PACKET_SIZE};
    use madara_context::{EvalSettings, RecordValue};

    fn settings() -> QoSSettings {
        QoSSettings { domain: "default".into(), ..QoSSettings::default() }
    }

    #[test]
    fn unknown_header_is_rejected() {
        let context = Context::new();
        let filters = FilterChain::default();
        let fragments = Mutex::new(FragmentMap::new(4));
        let bandwidth = BandwidthMonitor::new(10);
        let code = receive_datagram(
            &[0u8; FULL_HEADER_SIZE],
            "peer:1",
            &context,
            &filters,
            &fragments,
            &bandwidth,
            &settings(),
            "self:1",
            None,
        );
        assert_eq!(code.applied, receive_status::UNKNOWN_HEADER);
    }

    #[test]
    fn self_originated_message_is_dropped() {
        let context = Context::new();
        let filters = FilterChain::default();
        let fragments = Mutex::new(FragmentMap::new(4));
        let bandwidth = BandwidthMonitor::new(10);

        let mut updates = Vec::new();
        encode_update(&mut updates, "x", &Record::new(RecordValue::Integer(1), 1, 0));
        let header = FullHeader {
            size: (FULL_HEADER_SIZE + updates.len()) as u64,
            domain: "default".into(),
            originator: "self:1".into(),
            message_type: MULTIASSIGN,
            updates: 1,
            quality: 0,
            clock: 1,
            timestamp: now_secs(),
            ttl: 0,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        buf.extend_from_slice(&updates);

        let code = receive_datagram(&buf, "peer:1", &context, &filters, &fragments, &bandwidth, &settings(), "self:1", None);
        assert_eq!(code.applied, receive_status::SELF_ORIGINATED);
    }

    #[test]
    fn accepted_update_is_merged_into_the_context() {
        let context = Context::new();
        let filters = FilterChain::default();
        let fragments = Mutex::new(FragmentMap::new(4));
        let bandwidth = BandwidthMonitor::new(10);

        let mut updates = Vec::new();
        encode_update(&mut updates, "x", &Record::new(RecordValue::Integer(7), 5, 0));
        let header = FullHeader {
            size: (FULL_HEADER_SIZE + updates.len()) as u64,
            domain: "default".into(),
            originator: "other:1".into(),
            message_type: MULTIASSIGN,
            updates: 1,
            quality: 0,
            clock: 5,
            timestamp: now_secs(),
            ttl: 0,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        buf.extend_from_slice(&updates);

        let outcome = receive_datagram(&buf, "peer:1", &context, &filters, &fragments, &bandwidth, &settings(), "self:1", None);
        assert_eq!(outcome.applied, 1);
        assert_eq!(context.get("x").as_i64(), 7);
    }

    #[test]
    fn positive_ttl_with_rebroadcast_enabled_produces_a_rebroadcast_datagram() {
        let context = Context::new();
        let filters = FilterChain::default();
        let fragments = Mutex::new(FragmentMap::new(4));
        let bandwidth = BandwidthMonitor::new(10);

        let mut updates = Vec::new();
        encode_update(&mut updates, "x", &Record::new(RecordValue::Integer(7), 5, 0));
        let header = FullHeader {
            size: (FULL_HEADER_SIZE + updates.len()) as u64,
            domain: "default".into(),
            originator: "other:1".into(),
            message_type: MULTIASSIGN,
            updates: 1,
            quality: 0,
            clock: 5,
            timestamp: now_secs(),
            ttl: 3,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        buf.extend_from_slice(&updates);

        let mut rebroadcasting_settings = settings();
        rebroadcasting_settings.participant_rebroadcast_ttl = 5;
        rebroadcasting_settings.hosts = vec!["127.0.0.1:9001".into(), "127.0.0.1:9002".into()];

        let outcome = receive_datagram(
            &buf,
            "127.0.0.1:9001",
            &context,
            &filters,
            &fragments,
            &bandwidth,
            &rebroadcasting_settings,
            "self:1",
            None,
        );
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.rebroadcast.len(), 1);

        let rebroadcast_header = FullHeader::read(&outcome.rebroadcast[0]).unwrap();
        assert_eq!(rebroadcast_header.originator, "other:1");
        assert_eq!(rebroadcast_header.ttl, 2);

        let targets = rebroadcast_targets(&rebroadcasting_settings, "other:1", "127.0.0.1:9001");
        assert_eq!(targets, vec!["127.0.0.1:9002".parse().unwrap()]);
    }

    #[test]
    fn wrong_domain_is_rejected() {
        let context = Context::new();
        let filters = FilterChain::default();
        let fragments = Mutex::new(FragmentMap::new(4));
        let bandwidth = BandwidthMonitor::new(10);

        let mut updates = Vec::new();
        encode_update(&mut updates, "x", &Record::new(RecordValue::Integer(1), 1, 0));
        let header = FullHeader {
            size: (FULL_HEADER_SIZE + updates.len()) as u64,
            domain: "other-domain".into(),
            originator: "other:1".into(),
            message_type: MULTIASSIGN,
            updates: 1,
            quality: 0,
            clock: 1,
            timestamp: now_secs(),
            ttl: 0,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        buf.extend_from_slice(&updates);

        let code = receive_datagram(&buf, "peer:1", &context, &filters, &fragments, &bandwidth, &settings(), "self:1", None);
        assert_eq!(code.applied, receive_status::WRONG_DOMAIN);
    }

    #[test]
    fn send_data_with_no_modified_records_sends_nothing() {
        let context = Arc::new(Context::new());
        let transport = Transport::new(context, QoSSettings { hosts: vec!["127.0.0.1:0".into()], ..QoSSettings::default() }).unwrap();
        assert_eq!(transport.send_data(&[]).unwrap(), 0);
    }

    #[test]
    fn send_data_frames_modified_records_and_reaches_a_listener() {
        let context = Arc::new(Context::new());
        context.set("x", Record::new(RecordValue::Integer(9), 0, 0), &EvalSettings::default());

        let mut settings = QoSSettings { hosts: vec!["127.0.0.1:0".into()], ..QoSSettings::default() };
        settings.max_fragment_size = MAX_PACKET_SIZE;
        let transport = Transport::new(context, settings).unwrap();

        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let target = listener.local_addr().unwrap();

        let sent = transport.send_data(&[target]).unwrap();
        assert!(sent > 0);

        let mut buf = vec![0u8; 4096];
        let (len, _) = listener.recv_from(&mut buf).unwrap();
        assert!(crate::header::FullHeader::identifies(&buf[..len]));
    }

    #[test]
    fn stats_tracks_fragmentation_and_reassembly_across_real_sockets() {
        let sender_context = Arc::new(Context::new());
        for i in 0..50 {
            sender_context.set(
                &format!("key{i}"),
                Record::new(RecordValue::Integer(i), 0, 0),
                &EvalSettings::default(),
            );
        }

        let mut sender_settings = QoSSettings { hosts: vec!["127.0.0.1:0".into()], domain: "test".into(), ..QoSSettings::default() };
        sender_settings.max_fragment_size = 64;
        let sender = Transport::new(sender_context, sender_settings).unwrap();

        let receiver_context = Arc::new(Context::new());
        let receiver_settings = QoSSettings { hosts: vec!["127.0.0.1:0".into()], domain: "test".into(), ..QoSSettings::default() };
        let receiver = Transport::new(receiver_context.clone(), receiver_settings).unwrap();
        let receiver_addr = receiver.local_addr().unwrap();
        receiver.start();

        let sent = sender.send_data(&[receiver_addr]).unwrap();
        assert!(sent > 0);
        assert!(sender.stats().fragments_sent > 1);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while receiver.stats().fragments_reassembled == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(receiver.stats().fragments_reassembled, 1);
        assert_eq!(receiver_context.get("key0").as_i64(), 0);

        receiver.close();
    }
}
