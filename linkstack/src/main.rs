//! Entry point for `linkstack`.
//!
//! Runs one process of a static group: loads the membership file, binds the
//! process's UDP address, builds Perfect Links and Best-Effort Broadcast on
//! top of it, broadcasts `--messages` messages and prints every delivery.
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing); the protocols live in the library.  SIGINT and SIGTERM both stop
//! the process cleanly.
//!
//! Output lines follow the usual course-log convention:
//! `b <seq>` per broadcast, `d <sender-id> <seq>` per delivery.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use linkstack::{
    broadcast, Membership, NodeConfig, Packet, RetransmitPolicy, SelfDelivery, UdpTransport,
};

/// One process of a best-effort broadcast group over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Id of this process in the membership file.
    id: u32,

    /// Membership file: process count, then `id host port` per line.
    membership: PathBuf,

    /// Number of messages to broadcast after start-up.
    #[arg(short, long, default_value_t = 0)]
    messages: u32,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    rto_ms: u64,

    /// Double the timeout after every retransmission.
    #[arg(long)]
    backoff: bool,

    /// Timer tick in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// What to do with the broadcaster's own copy: network, direct or skip.
    #[arg(long, default_value_t = SelfDelivery::Network)]
    self_delivery: SelfDelivery,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let membership = Membership::load(&cli.membership)
        .with_context(|| format!("could not read membership {}", cli.membership.display()))?;
    let membership = Arc::new(membership);
    let me = membership
        .get(cli.id)
        .with_context(|| format!("process {} is not in the membership", cli.id))?
        .clone();

    let rto = Duration::from_millis(cli.rto_ms);
    let config = NodeConfig {
        retransmit: if cli.backoff {
            RetransmitPolicy::backoff(rto)
        } else {
            RetransmitPolicy::Fixed(rto)
        },
        tick: Duration::from_millis(cli.tick_ms.max(1)),
        self_delivery: cli.self_delivery,
    };

    let transport = UdpTransport::bind(me.addr)
        .await
        .with_context(|| format!("could not bind {}", me.addr))?;
    let mut app =
        broadcast::stack_over(transport.into_socket(), membership.clone(), me.id, &config)?;
    log::info!("{me} running with {} peer(s), {config:?}", membership.len());

    // Installed before the first broadcast so an early SIGTERM is not lost.
    let stop = stop_signal().context("could not install signal handlers")?;
    tokio::pin!(stop);

    for seq in 1..=cli.messages {
        let msg = Packet::new(me.addr, i64::from(seq), format!("{}:{seq}", me.id));
        app.send(msg).context("stack shut down while broadcasting")?;
        println!("b {seq}");
    }

    loop {
        tokio::select! {
            delivered = app.recv() => {
                let Some(pkt) = delivered else {
                    log::warn!("stack shut down");
                    break;
                };
                match membership.id_of(pkt.peer()) {
                    Some(sender) => println!("d {sender} {}", pkt.seq()),
                    None => log::warn!("delivery from unknown {}", pkt.peer()),
                }
            }
            signal = &mut stop => {
                log::info!("{me} stopping on {}", signal?);
                break;
            }
        }
    }

    Ok(())
}

/// Resolves with the signal name once SIGINT or SIGTERM arrives.
#[cfg(unix)]
fn stop_signal() -> io::Result<impl Future<Output = io::Result<&'static str>>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => Ok("SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    })
}

#[cfg(not(unix))]
fn stop_signal() -> io::Result<impl Future<Output = io::Result<&'static str>>> {
    Ok(async { tokio::signal::ctrl_c().await.map(|()| "Ctrl-C") })
}
