//! Network state tracking: reachability probe plus online/offline transitions.
//!
//! The tracker is polled from the engine's orchestration loop at a fixed
//! interval (plus once eagerly on start). A failed probe parks the state at
//! Unknown without emitting a transition, so transient probe errors never
//! produce a false offline storm.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

/// Three-valued connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetState {
    Online,
    Offline,
    Unknown,
}

/// A confirmed state change. Transitions into Unknown are never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetTransition {
    pub from: NetState,
    pub to: NetState,
}

impl NetTransition {
    pub fn went_online(&self) -> bool {
        self.to == NetState::Online && self.from != NetState::Online
    }

    pub fn went_offline(&self) -> bool {
        self.to == NetState::Offline && self.from != NetState::Offline
    }
}

/// Single-shot reachability check.
///
/// `Ok(true)` means connected, `Ok(false)` means confirmed no connectivity,
/// `Err` means the probe itself failed (state becomes Unknown).
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn check(&self) -> Result<bool>;
}

/// Probe that attempts a TCP connect to a well-known address.
/// A connect error is a confirmed offline signal, not a probe failure.
pub struct TcpProbe {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: &str, timeout: Duration) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid probe address: {addr}"))?;
        Ok(TcpProbe { addr, timeout })
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn check(&self) -> Result<bool> {
        let addr = self.addr;
        let timeout = self.timeout;
        let connected = tokio::task::spawn_blocking(move || {
            TcpStream::connect_timeout(&addr, timeout).is_ok()
        })
        .await
        .context("probe task join")?;
        Ok(connected)
    }
}

/// Tracks the confirmed connectivity state across probe results.
pub struct NetworkTracker {
    probe: Arc<dyn NetworkProbe>,
    state: NetState,
}

impl NetworkTracker {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        NetworkTracker {
            probe,
            state: NetState::Unknown,
        }
    }

    /// Best-effort point-in-time read; transfers can still fail despite
    /// this reporting true.
    pub fn is_online(&self) -> bool {
        self.state == NetState::Online
    }

    pub fn state(&self) -> NetState {
        self.state
    }

    /// Run the probe once and fold its result into the tracked state.
    pub async fn poll_once(&mut self) -> Option<NetTransition> {
        let result = self.probe.check().await;
        self.apply_probe(result)
    }

    /// Fold one probe result into the state; returns a transition when the
    /// confirmed state changed. Probe failures park the state at Unknown
    /// silently.
    pub fn apply_probe(&mut self, result: Result<bool>) -> Option<NetTransition> {
        let new_state = match result {
            Ok(true) => NetState::Online,
            Ok(false) => NetState::Offline,
            Err(e) => {
                tracing::debug!("network probe failed: {e:#}");
                self.state = NetState::Unknown;
                return None;
            }
        };

        if new_state == self.state {
            return None;
        }
        let transition = NetTransition {
            from: self.state,
            to: new_state,
        };
        self.state = new_state;
        tracing::info!(
            "network state changed: {:?} -> {:?}",
            transition.from,
            transition.to
        );
        Some(transition)
    }
}
