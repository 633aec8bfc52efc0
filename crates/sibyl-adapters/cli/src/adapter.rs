//! The terminal protocol adapter.
//!
//! Reading stdin blocks, so a background thread owns the reader and hands
//! complete lines to the main loop through a bounded channel. `process()`
//! waits on that channel for at most `poll_ms` and reports at most one line
//! per call.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use async_trait::async_trait;
use parking_lot::Mutex;
use sibyl_core::{
    ConfigurableProtocol, Message, Outgoing, Protocol, ProtocolContext, ProtocolError,
    ProtocolResult, Target, User, UserKind,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CliConfig;

const PROTOCOL_NAME: &str = "cli";

type Reader = Box<dyn BufRead + Send>;
type Writer = Box<dyn Write + Send>;

/// The console adapter.
pub struct CliProtocol {
    config: CliConfig,
    ctx: Mutex<Option<ProtocolContext>>,
    /// Taken by the reader thread on the first connect.
    reader: Mutex<Option<Reader>>,
    writer: Mutex<Writer>,
    lines: tokio::sync::Mutex<Option<mpsc::Receiver<String>>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl CliProtocol {
    /// An adapter on the process's stdin and stdout.
    pub fn new(config: CliConfig) -> Self {
        Self::with_io(
            config,
            Box::new(io::BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }

    /// An adapter on arbitrary streams.
    pub fn with_io(config: CliConfig, reader: Reader, writer: Writer) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(writer),
            lines: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    fn context(&self) -> ProtocolResult<ProtocolContext> {
        self.ctx
            .lock()
            .clone()
            .ok_or_else(|| ProtocolError::other("cli adapter used before setup"))
    }

    fn on_line(&self, ctx: &ProtocolContext, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let user = self.new_user(&self.config.user, UserKind::Private, None);
        ctx.message_received(Message::private(user, line));
    }

    fn on_eof(&self, ctx: &ProtocolContext) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Console closed");
        if self.config.exit_on_eof {
            ctx.request_shutdown("console closed");
        }
    }
}

fn read_lines(mut reader: Reader, tx: mpsc::Sender<String>) {
    let mut buf = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(_) => {
                if tx.blocking_send(buf.clone()).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Console read failed");
                break;
            }
        }
    }
    debug!("Console reader finished");
}

#[async_trait]
impl Protocol for CliProtocol {
    fn name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn setup(&self, ctx: ProtocolContext) {
        *self.ctx.lock() = Some(ctx);
    }

    async fn connect(&self) -> ProtocolResult<()> {
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
            thread::Builder::new()
                .name("sibyl-cli-reader".into())
                .spawn(move || read_lines(reader, tx))
                .map_err(|e| ProtocolError::ConnectFailure(e.to_string()))?;
            *self.lines.lock().await = Some(rx);
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(user = %self.config.user, "Console attached");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn process(&self) -> ProtocolResult<()> {
        let ctx = self.context()?;
        let mut lines = self.lines.lock().await;
        let Some(rx) = lines.as_mut() else {
            tokio::time::sleep(self.config.poll()).await;
            return Ok(());
        };
        match tokio::time::timeout(self.config.poll(), rx.recv()).await {
            Ok(Some(line)) => self.on_line(&ctx, &line),
            Ok(None) => {
                *lines = None;
                self.on_eof(&ctx);
            }
            Err(_) => {}
        }
        Ok(())
    }

    async fn send(&self, msg: &Outgoing) -> ProtocolResult<()> {
        if !self.is_connected() {
            return Err(ProtocolError::NotConnected);
        }
        let mut writer = self.writer.lock();
        let written = match &msg.target {
            Target::Room(room) => writeln!(writer, "[{}] {}", room.name(), msg.text),
            Target::User(_) => writeln!(writer, "{}", msg.text),
        };
        written
            .and_then(|()| writer.flush())
            .map_err(|e| ProtocolError::other(format!("console write failed: {e}")))
    }

    fn get_user(&self) -> User {
        let nick = self
            .ctx
            .lock()
            .as_ref()
            .map_or_else(|| "SibylBot".to_string(), |ctx| ctx.bot_nick().to_string());
        User::new(PROTOCOL_NAME, nick, UserKind::Private)
    }

    async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.writer.lock().flush() {
            warn!(error = %e, "Console flush failed");
        }
    }
}

impl ConfigurableProtocol for CliProtocol {
    type Config = CliConfig;

    fn protocol_name() -> &'static str {
        PROTOCOL_NAME
    }

    fn from_config(config: CliConfig) -> ProtocolResult<Arc<Self>> {
        Ok(Arc::new(Self::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use sibyl_core::{ProtocolEvent, Room};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn console(input: &str, out: Captured) -> (CliProtocol, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let config = CliConfig {
            poll_ms: 1000,
            ..Default::default()
        };
        let cli = CliProtocol::with_io(config, Box::new(Cursor::new(input.to_string())), Box::new(out));
        let (tx, rx) = mpsc::unbounded_channel();
        cli.setup(ProtocolContext::new("cli", "SibylBot", tx));
        (cli, rx)
    }

    #[tokio::test]
    async fn test_lines_become_messages_then_eof_stops() -> anyhow::Result<()> {
        let (cli, mut rx) = console("help\n\n  echo hi  \n", Captured::default());
        cli.connect().await?;

        for _ in 0..4 {
            cli.process().await?;
        }

        let ProtocolEvent::Message(first) = rx.try_recv()? else {
            panic!("expected a message");
        };
        assert_eq!(first.text(), "help");
        assert_eq!(first.user().id(), "admin");
        assert_eq!(first.user().protocol(), "cli");

        let ProtocolEvent::Message(second) = rx.try_recv()? else {
            panic!("expected a message");
        };
        assert_eq!(second.text(), "echo hi");

        assert!(matches!(
            rx.try_recv()?,
            ProtocolEvent::ShutdownRequested { protocol, .. } if protocol == "cli"
        ));
        assert!(rx.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_send_writes_lines() -> anyhow::Result<()> {
        let out = Captured::default();
        let (cli, _rx) = console("", out.clone());

        let to_user = Outgoing::new("hello", User::new("cli", "admin", UserKind::Private));
        assert!(matches!(cli.send(&to_user).await, Err(ProtocolError::NotConnected)));

        cli.connect().await?;
        cli.send(&to_user).await?;
        cli.send(&Outgoing::new("welcome", Room::new("cli", "lobby"))).await?;
        assert_eq!(out.text(), "hello\n[lobby] welcome\n");
        Ok(())
    }

    #[test]
    fn test_identity() {
        let (cli, _rx) = console("", Captured::default());
        assert_eq!(cli.get_user().id(), "SibylBot");
        assert_eq!(CliProtocol::protocol_name(), cli.name());
    }
}
