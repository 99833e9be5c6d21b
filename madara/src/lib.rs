// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! MADARA: the participant-facing facade tying the thread-safe
//! [`Context`], the KaRL expression engine, and the UDP [`Transport`]
//! together (spec.md §1 "the core"). This crate is deliberately thin: it
//! wires the three subsystems the way a host application would, rather
//! than adding behavior of its own.

mod error;

pub use error::{MadaraError, MadaraResult};
pub use madara_context::{Context, EvalSettings, Record, RecordValue, UpdateSettings};
pub use madara_karl::{Compiled, ContextExt, KarlError, KarlResult};
pub use madara_transport::{self as transport, QoSSettings, Transport};

use log::warn;
use std::net::SocketAddr;
use std::sync::Arc;

/// A single MADARA participant: a knowledge base plus, once attached,
/// the transport that disseminates its changes and merges in others'
/// (spec.md §2 "Data flow").
pub struct KnowledgeBase {
    context: Arc<Context>,
    transport: Option<Transport>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBase {
    pub fn new() -> Self {
        KnowledgeBase { context: Arc::new(Context::new()), transport: None }
    }

    /// The underlying context, for callers who need direct access (e.g.
    /// to build containers on top of it, spec.md §9's "internal facade"
    /// pattern).
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    pub fn compile(&self, source: &str) -> KarlResult<Compiled> {
        self.context.compile(source)
    }

    pub fn evaluate(&self, source: &str) -> KarlResult<Record> {
        self.context.evaluate(source, &EvalSettings::default())
    }

    /// Binds a [`Transport`] to this participant's context and starts
    /// its read threads. `settings.on_data_received_logic`, if set, is
    /// compiled once up front and wired to the transport's
    /// data-received hook, so a compile error surfaces immediately
    /// rather than silently no-op-ing on the first receive.
    pub fn attach_transport(&mut self, settings: QoSSettings) -> MadaraResult<()> {
        let mut transport = Transport::new(self.context.clone(), settings.clone())?;

        if let Some(logic) = settings.on_data_received_logic.clone() {
            let compiled = self.context.compile(&logic)?;
            transport.set_on_data_received_hook(Arc::new(move |ctx: &Context| {
                let settings = EvalSettings::default();
                let _ = compiled.evaluate(ctx, &settings);
            }));
        }

        transport.start();
        self.transport = Some(transport);
        Ok(())
    }

    /// `send_data` (spec.md §4.7): frames and sends every modified
    /// record to `targets`. Returns `0` if no transport is attached.
    pub fn send(&self, targets: &[SocketAddr]) -> MadaraResult<usize> {
        match &self.transport {
            Some(transport) => Ok(transport.send_data(targets)?),
            None => Ok(0),
        }
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    pub fn transport_mut(&mut self) -> Option<&mut Transport> {
        self.transport.as_mut()
    }

    /// Stops the transport's read threads, if any are running
    /// (spec.md §5 "Cancellation").
    pub fn close(&self) {
        if let Some(transport) = &self.transport {
            transport.close();
        } else {
            warn!("close() called with no transport attached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_evaluate_share_the_same_context() {
        let kb = KnowledgeBase::new();
        kb.evaluate("x = 41").unwrap();
        kb.evaluate("x += 1").unwrap();
        assert_eq!(kb.context().get("x").as_i64(), 42);
    }

    #[test]
    fn send_without_a_transport_is_a_harmless_no_op() {
        let kb = KnowledgeBase::new();
        kb.evaluate("x = 1").unwrap();
        assert_eq!(kb.send(&[]).unwrap(), 0);
    }

    #[test]
    fn two_participants_converge_over_a_real_socket() {
        let mut a = KnowledgeBase::new();
        let mut b = KnowledgeBase::new();

        let a_settings = QoSSettings { hosts: vec!["127.0.0.1:0".into()], domain: "test".into(), ..QoSSettings::default() };
        let b_settings = QoSSettings { hosts: vec!["127.0.0.1:0".into()], domain: "test".into(), ..QoSSettings::default() };

        a.attach_transport(a_settings).unwrap();
        b.attach_transport(b_settings).unwrap();

        let b_addr = b.transport().unwrap().local_addr().unwrap();

        a.evaluate("temperature = 72").unwrap();
        a.send(&[b_addr]).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while b.context().get("temperature").is_uncreated() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(b.context().get("temperature").as_i64(), 72);

        a.close();
        b.close();
    }

    #[test]
    fn on_data_received_logic_runs_after_a_merge() {
        let mut a = KnowledgeBase::new();
        let mut b = KnowledgeBase::new();

        let a_settings = QoSSettings { hosts: vec!["127.0.0.1:0".into()], domain: "test".into(), ..QoSSettings::default() };
        let b_settings = QoSSettings {
            hosts: vec!["127.0.0.1:0".into()],
            domain: "test".into(),
            on_data_received_logic: Some("received_count += 1".into()),
            ..QoSSettings::default()
        };

        a.attach_transport(a_settings).unwrap();
        b.attach_transport(b_settings).unwrap();

        let b_addr = b.transport().unwrap().local_addr().unwrap();

        a.evaluate("x = 1").unwrap();
        a.send(&[b_addr]).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while b.context().get("received_count").is_uncreated() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(b.context().get("received_count").as_i64(), 1);

        a.close();
        b.close();
    }
}
