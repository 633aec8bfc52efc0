//! Echo Bot Demo
//!
//! Wires the terminal adapter to a small plugin:
//!
//! - `echo <text>` repeats its arguments
//! - `shout <text>` repeats them in upper case
//! - every message is logged by a passive hook
//!
//! together with the built-in `core` commands (`help`, `alias`, `trigger`,
//! `die`, ...).
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo_bot -- --config sibyl.toml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use sibyl::prelude::*;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "echo_bot", about = "A Sibyl bot on the terminal")]
struct Args {
    /// Configuration file; searched in the working directory when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `development`.
    #[arg(short, long)]
    profile: Option<String>,
}

async fn echo(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> Option<String> {
    (!args.is_empty()).then(|| args.join(" "))
}

async fn shout(_bot: Bot, _msg: Arc<Message>, args: Vec<String>) -> String {
    args.join(" ").to_uppercase()
}

async fn log_message(_bot: Bot, event: HookEvent) {
    if let HookEvent::Message(msg) = event {
        info!(from = %msg.user(), text = %msg.text(), "Message seen");
    }
}

static ECHO: PluginDescriptor = define_plugin! {
    /// Repeats what it is told.
    name: "echo",
    items: [
        command("echo", echo),
        command("shout", shout),
        hook(HookKind::Message, log_message),
    ],
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = SibylRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = args.profile {
        builder = builder.profile(profile);
    }
    let mut runtime = builder.build()?;

    runtime.register_protocol::<CliProtocol>()?;
    runtime.register_plugin(ECHO);

    runtime.run().await?;
    Ok(())
}
