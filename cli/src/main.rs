//! chainsub CLI: watch pub/sub notifications from the terminal.
//!
//! Usage:
//! ```bash
//! # Watch an account
//! chainsub watch --url wss://api.mainnet-beta.solana.com --account <PUBKEY>
//!
//! # Watch all logs plus a program, with debug logging
//! chainsub watch --url ws://localhost:8900 --logs all --program <PUBKEY> --verbose
//!
//! # Load connection settings from a JSON file
//! chainsub watch --config socket.json --signature <SIG>
//! ```

use std::env;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use chainsub_core::error::SocketError;
use chainsub_core::method::{LogsFilter, SubscriptionKind};
use chainsub_core::subscription::{LocalId, SocketHandle};
use chainsub_ws::{SocketClient, SocketConfig, SocketDelegate, WsTransport};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "watch" => cmd_watch(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("chainsub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainsub {}", env!("CARGO_PKG_VERSION"));
    println!("Watch Solana-style pub/sub notifications over WebSocket\n");
    println!("USAGE:");
    println!("    chainsub <COMMAND>\n");
    println!("COMMANDS:");
    println!("    watch      Subscribe and print notifications as JSON lines");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("WATCH FLAGS:");
    println!("    --url <URL>            WebSocket endpoint  [required unless --config]");
    println!("    --config <FILE>        JSON socket config (url, connect_timeout_ms, reconnect)");
    println!("    --account <PUBKEY>     Subscribe to an account (repeatable)");
    println!("    --program <PUBKEY>     Subscribe to a program's accounts (repeatable)");
    println!("    --signature <SIG>      Subscribe to a transaction signature (repeatable)");
    println!("    --logs <all|A,B,..>    Subscribe to all logs or logs mentioning addresses");
    println!("    --verbose              Debug logging (RUST_LOG overrides)");
}

/// One thing to subscribe to once the socket is up.
#[derive(Debug, Clone)]
enum Target {
    Account(String),
    Program(String),
    Signature(String),
    Logs(LogsFilter),
}

/// Delegate callbacks, forwarded to the watch loop.
#[derive(Debug)]
enum WatchEvent {
    Connected,
    Subscribed(SocketHandle, LocalId),
    Unsubscribed(LocalId),
    Notification(SubscriptionKind, LocalId, Value),
    Disconnected(String, u16),
    Error(String),
}

struct ChannelDelegate(mpsc::UnboundedSender<WatchEvent>);

impl ChannelDelegate {
    fn forward(&self, event: WatchEvent) {
        let _ = self.0.send(event);
    }
}

impl SocketDelegate for ChannelDelegate {
    fn connected(&self) {
        self.forward(WatchEvent::Connected);
    }
    fn subscribed(&self, handle: SocketHandle, id: &LocalId) {
        self.forward(WatchEvent::Subscribed(handle, id.clone()));
    }
    fn unsubscribed(&self, id: &LocalId) {
        self.forward(WatchEvent::Unsubscribed(id.clone()));
    }
    fn account_notification(&self, id: &LocalId, payload: Value) {
        self.forward(WatchEvent::Notification(SubscriptionKind::Account, id.clone(), payload));
    }
    fn program_notification(&self, id: &LocalId, payload: Value) {
        self.forward(WatchEvent::Notification(SubscriptionKind::Program, id.clone(), payload));
    }
    fn signature_notification(&self, id: &LocalId, payload: Value) {
        self.forward(WatchEvent::Notification(SubscriptionKind::Signature, id.clone(), payload));
    }
    fn logs_notification(&self, id: &LocalId, payload: Value) {
        self.forward(WatchEvent::Notification(SubscriptionKind::Logs, id.clone(), payload));
    }
    fn disconnected(&self, reason: &str, code: u16) {
        self.forward(WatchEvent::Disconnected(reason.to_string(), code));
    }
    fn error(&self, error: &SocketError) {
        self.forward(WatchEvent::Error(error.to_string()));
    }
}

async fn cmd_watch(args: &[String]) -> anyhow::Result<()> {
    init_logging(args.iter().any(|a| a == "--verbose"));

    let config = match parse_flag(args, "--config") {
        Some(path) => {
            let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            SocketConfig::from_json_str(&raw).with_context(|| format!("parsing {path}"))?
        }
        None => {
            let url = parse_flag(args, "--url").context("--url or --config is required")?;
            SocketConfig::new(url)
        }
    };

    let targets = parse_targets(args)?;
    if targets.is_empty() {
        bail!("nothing to watch: pass --account, --program, --signature or --logs");
    }

    let transport = Arc::new(WsTransport::new(config.reconnect.clone()));
    let client = SocketClient::new(transport, config);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let delegate: Arc<dyn SocketDelegate> = Arc::new(ChannelDelegate(tx));
    client.start(&delegate).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut subscribed = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("interrupted");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    WatchEvent::Connected => {
                        // Later connects are re-subscribed by the client.
                        if !subscribed {
                            subscribe_all(&client, &targets);
                            subscribed = true;
                        }
                    }
                    WatchEvent::Subscribed(handle, id) => {
                        tracing::info!(local_id = %id, handle, "subscribed");
                    }
                    WatchEvent::Unsubscribed(id) => {
                        tracing::info!(local_id = %id, "unsubscribed");
                    }
                    WatchEvent::Notification(kind, id, payload) => {
                        println!("{}", json!({"subscription": id, "kind": kind.to_string(), "result": payload}));
                    }
                    WatchEvent::Disconnected(reason, code) => {
                        tracing::warn!(%reason, code, "disconnected, waiting for reconnect");
                    }
                    WatchEvent::Error(e) => tracing::error!(error = %e, "socket error"),
                }
            }
        }
    }

    client.stop();
    Ok(())
}

fn subscribe_all(client: &SocketClient, targets: &[Target]) {
    for target in targets {
        let result = match target {
            Target::Account(key) => client.account_subscribe(key),
            Target::Program(key) => client.program_subscribe(key),
            Target::Signature(sig) => client.signature_subscribe(sig),
            Target::Logs(filter) => client.logs_subscribe(filter.clone()),
        };
        match result {
            Ok(id) => tracing::debug!(local_id = %id, ?target, "subscribe requested"),
            Err(e) => tracing::error!(error = %e, ?target, "subscribe failed"),
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_targets(args: &[String]) -> anyhow::Result<Vec<Target>> {
    let mut targets = Vec::new();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let target = match flag.as_str() {
            "--account" => Target::Account(flag_value(&mut iter, flag)?),
            "--program" => Target::Program(flag_value(&mut iter, flag)?),
            "--signature" => Target::Signature(flag_value(&mut iter, flag)?),
            "--logs" => Target::Logs(parse_logs_filter(&flag_value(&mut iter, flag)?)),
            "--url" | "--config" => {
                iter.next();
                continue;
            }
            _ => continue,
        };
        targets.push(target);
    }
    Ok(targets)
}

fn flag_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> anyhow::Result<String> {
    iter.next()
        .cloned()
        .with_context(|| format!("{flag} needs a value"))
}

fn parse_logs_filter(value: &str) -> LogsFilter {
    if value == "all" {
        return LogsFilter::All;
    }
    LogsFilter::Mentions(
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn targets_keep_order_and_repeat() {
        let targets =
            parse_targets(&args("--url ws://x --account A --logs all --account B --verbose")).unwrap();
        assert_eq!(targets.len(), 3);
        assert!(matches!(&targets[0], Target::Account(k) if k == "A"));
        assert!(matches!(&targets[1], Target::Logs(LogsFilter::All)));
        assert!(matches!(&targets[2], Target::Account(k) if k == "B"));
    }

    #[test]
    fn logs_mentions_split_on_commas() {
        assert_eq!(
            parse_logs_filter("A1, B2,"),
            LogsFilter::Mentions(vec!["A1".into(), "B2".into()])
        );
    }

    #[test]
    fn missing_value_is_an_error() {
        assert!(parse_targets(&args("--signature")).is_err());
    }

    #[test]
    fn url_value_is_not_a_target() {
        assert!(parse_targets(&args("--url --account")).unwrap().is_empty());
    }
}
