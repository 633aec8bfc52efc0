//! Connection supervision for one protocol.
//!
//! ```text
//!          connect ok                       process error / timeout
//!   Idle ─────────────► Connected ───────────────────────────────┐
//!    │                     ▲                                     ▼
//!    │ connect error       └────── connect ok ◄──── wait ──── Backoff
//!    ▼                                                           │
//!  Backoff ◄─────────────────────────────────────────────────────┘
//!
//!   AuthFailure anywhere ──► Disabled
//! ```
//!
//! The backoff is a fixed wait, `reconnect_wait_secs`. A `process()` call
//! that outlives `process_timeout_ms` counts as a ping timeout.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use sibyl_core::{BoxedProtocol, ProtocolError, ProtocolResult};
use sibyl_framework::handler::panic_message;
use tokio::time::{Instant, timeout};
use tracing::{error, info, warn};

use crate::config::ProtocolConfig;

/// Connection state of a supervised protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    /// Not connected yet.
    Idle,
    Connected,
    /// Waiting until the instant before reconnecting.
    Backoff(Instant),
    /// Permanently failed; the reason is kept for reporting.
    Disabled(String),
}

/// A state change the main loop has to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    Connected,
    Disconnected(String),
    Disabled(String),
}

/// Runs `fut`, turning a panicking adapter into a [`ProtocolError::Other`].
async fn contained<F>(fut: F) -> ProtocolResult<()>
where
    F: Future<Output = ProtocolResult<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(ProtocolError::other(format!(
            "adapter panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

pub struct ProtocolSlot {
    protocol: BoxedProtocol,
    config: ProtocolConfig,
    state: SlotState,
}

impl ProtocolSlot {
    pub fn new(protocol: BoxedProtocol, config: ProtocolConfig) -> Self {
        Self {
            protocol,
            config,
            state: SlotState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        self.protocol.name()
    }

    pub fn protocol(&self) -> &BoxedProtocol {
        &self.protocol
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SlotState::Connected && self.protocol.is_connected()
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.state, SlotState::Disabled(_))
    }

    /// Connects, pumps or waits, depending on the current state.
    pub async fn step(&mut self, now: Instant) -> Option<SlotEvent> {
        match self.state {
            SlotState::Disabled(_) => None,
            SlotState::Backoff(until) if now < until => None,
            SlotState::Idle | SlotState::Backoff(_) => self.connect(now).await,
            SlotState::Connected => self.process(now).await,
        }
    }

    async fn connect(&mut self, now: Instant) -> Option<SlotEvent> {
        match contained(self.protocol.connect()).await {
            Ok(()) => {
                info!(protocol = %self.name(), "Protocol connected");
                self.state = SlotState::Connected;
                Some(SlotEvent::Connected)
            }
            Err(e) if !e.should_retry() => Some(self.disable(e)),
            Err(e) => {
                warn!(
                    protocol = %self.name(),
                    error = %e,
                    retry_in = ?self.config.reconnect_wait(),
                    "Connect failed"
                );
                self.state = SlotState::Backoff(now + self.config.reconnect_wait());
                None
            }
        }
    }

    async fn process(&mut self, now: Instant) -> Option<SlotEvent> {
        let limit = self.config.process_timeout();
        let result = match timeout(limit, contained(self.protocol.process())).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::PingTimeout(limit)),
        };
        let error = match result {
            Ok(()) if self.protocol.is_connected() => return None,
            Ok(()) => ProtocolError::NotConnected,
            Err(e) => e,
        };
        if !error.should_retry() {
            return Some(self.disable(error));
        }
        warn!(
            protocol = %self.name(),
            error = %error,
            retry_in = ?self.config.reconnect_wait(),
            "Protocol disconnected"
        );
        self.state = SlotState::Backoff(now + self.config.reconnect_wait());
        Some(SlotEvent::Disconnected(error.to_string()))
    }

    fn disable(&mut self, e: ProtocolError) -> SlotEvent {
        error!(protocol = %self.name(), error = %e, "Protocol disabled");
        let reason = e.to_string();
        self.state = SlotState::Disabled(reason.clone());
        SlotEvent::Disabled(reason)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use sibyl_core::{Outgoing, Protocol, ProtocolContext, User, UserKind};

    use super::*;

    /// What a scripted `connect()` or `process()` call does.
    enum Step {
        Ok,
        Fail(ProtocolError),
        Hang,
        Panic,
    }

    #[derive(Default)]
    struct Scripted {
        connects: Mutex<VecDeque<Step>>,
        processes: Mutex<VecDeque<Step>>,
        connected: AtomicBool,
    }

    async fn play(step: Option<Step>) -> ProtocolResult<()> {
        match step.unwrap_or(Step::Ok) {
            Step::Ok => Ok(()),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Step::Panic => panic!("adapter bug"),
        }
    }

    #[async_trait]
    impl Protocol for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        fn setup(&self, _ctx: ProtocolContext) {}
        async fn connect(&self) -> ProtocolResult<()> {
            let step = self.connects.lock().pop_front();
            play(step).await?;
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        async fn process(&self) -> ProtocolResult<()> {
            let step = self.processes.lock().pop_front();
            play(step).await
        }
        async fn send(&self, _msg: &Outgoing) -> ProtocolResult<()> {
            Ok(())
        }
        fn get_user(&self) -> User {
            User::new("scripted", "bot", UserKind::Private)
        }
    }

    fn slot(scripted: Arc<Scripted>) -> ProtocolSlot {
        let config = ProtocolConfig {
            reconnect_wait_secs: 10,
            process_timeout_ms: 500,
            ..Default::default()
        };
        ProtocolSlot::new(scripted, config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_backs_off() {
        let scripted = Arc::new(Scripted::default());
        scripted
            .connects
            .lock()
            .push_back(Step::Fail(ProtocolError::ConnectFailure("refused".into())));
        let mut slot = slot(scripted);

        assert_eq!(slot.step(Instant::now()).await, None);
        assert!(matches!(slot.state(), SlotState::Backoff(_)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(slot.step(Instant::now()).await, None);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(slot.step(Instant::now()).await, Some(SlotEvent::Connected));
        assert!(slot.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_failure_disables() {
        let scripted = Arc::new(Scripted::default());
        scripted
            .connects
            .lock()
            .push_back(Step::Fail(ProtocolError::AuthFailure("bad password".into())));
        let mut slot = slot(scripted);

        assert!(matches!(slot.step(Instant::now()).await, Some(SlotEvent::Disabled(_))));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(slot.step(Instant::now()).await, None);
        assert!(slot.is_disabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_process_is_a_ping_timeout() {
        let scripted = Arc::new(Scripted::default());
        scripted.processes.lock().push_back(Step::Hang);
        let mut slot = slot(scripted);

        assert_eq!(slot.step(Instant::now()).await, Some(SlotEvent::Connected));
        let event = slot.step(Instant::now()).await;
        let Some(SlotEvent::Disconnected(reason)) = event else {
            panic!("expected a disconnect, got {event:?}");
        };
        assert!(reason.contains("ping timeout"), "{reason}");
        assert!(matches!(slot.state(), SlotState::Backoff(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_process_reconnects() {
        let scripted = Arc::new(Scripted::default());
        scripted.processes.lock().push_back(Step::Panic);
        let mut slot = slot(scripted);

        slot.step(Instant::now()).await;
        let event = slot.step(Instant::now()).await;
        assert!(matches!(event, Some(SlotEvent::Disconnected(r)) if r.contains("adapter bug")));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(slot.step(Instant::now()).await, Some(SlotEvent::Connected));
    }
}
