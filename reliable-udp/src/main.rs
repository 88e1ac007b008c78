//! Entry point for the `reliable-udp` demo.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing) and printing.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reliable_udp::{ReliableSocket, RetransmitConfig};

/// Acknowledged datagrams over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Retransmission interval in milliseconds.
    #[arg(long, default_value_t = 30, global = true)]
    timeout_ms: u64,

    /// Give up on a packet after this many resends (default: never).
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive messages and echo each one back to its sender.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
    /// Send numbered messages to a server and print the echoes.
    Client {
        /// Remote server, as ip:port or host:port (e.g. localhost:9000).
        #[arg(short, long)]
        server: String,

        /// Fix the server as the socket's peer (connected mode).
        #[arg(long)]
        connected: bool,

        /// Number of messages to send.
        #[arg(short, long, default_value_t = 3)]
        count: usize,

        /// How send completion is observed.
        #[arg(long, value_enum, default_value_t = Style::Async)]
        style: Style,

        /// Send best-effort datagrams instead of acknowledged ones.
        #[arg(long)]
        unreliable: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Style {
    Sync,
    Async,
    Callback,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config =
        RetransmitConfig::default().with_timeout(Duration::from_millis(cli.timeout_ms));
    config.max_retries = cli.max_retries;

    match cli.mode {
        Mode::Server { bind } => {
            log::info!("Starting server on {bind}");
            run_server(bind, config).await
        }
        Mode::Client {
            server,
            connected,
            count,
            style,
            unreliable,
        } => {
            log::info!("Starting client, sending to {server}");
            run_client(server, connected, count, style, !unreliable, config).await
        }
    }
}

async fn run_server(bind: String, config: RetransmitConfig) -> Result<()> {
    let socket = ReliableSocket::bind_with_config(bind.as_str(), config)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let mut clients: Vec<SocketAddr> = Vec::new();

    loop {
        let (data, from) = match socket.recv_from().await {
            Ok(v) => v,
            Err(e) => {
                println!("Server end recv: {e}");
                return Ok(());
            }
        };
        if !clients.contains(&from) {
            println!("Got a client: {from}");
            clients.push(from);
        }
        println!("Server receive {:?} from {from}", String::from_utf8_lossy(&data));

        let mut reply = b"echo: ".to_vec();
        reply.extend_from_slice(&data);
        if let Err(e) = socket.send_to(&reply, from, true).await {
            log::warn!("reply to {from} failed: {e}");
        }
    }
}

async fn run_client(
    server: String,
    connected: bool,
    count: usize,
    style: Style,
    reliable: bool,
    config: RetransmitConfig,
) -> Result<()> {
    let server: SocketAddr = tokio::net::lookup_host(&server)
        .await
        .with_context(|| format!("resolving {server}"))?
        .next()
        .with_context(|| format!("{server} resolved to no addresses"))?;
    let any: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = if connected {
        ReliableSocket::connect_with_config(any, server, config).await?
    } else {
        ReliableSocket::bind_with_config(any, config).await?
    };

    let reader = socket.clone();
    let recv_task = tokio::spawn(async move {
        loop {
            match reader.recv_from().await {
                Ok((data, from)) => {
                    println!("Client receive {:?} from {from}", String::from_utf8_lossy(&data))
                }
                Err(e) => {
                    println!("Client end recv: {e}");
                    break;
                }
            }
        }
    });

    for i in 0..count {
        let message = format!("Hello #{i}").into_bytes();
        let sent = match style {
            Style::Async => {
                if connected {
                    socket.send(&message, reliable).await
                } else {
                    socket.send_to(&message, server, reliable).await
                }
            }
            Style::Sync => {
                let sock = socket.clone();
                tokio::task::spawn_blocking(move || {
                    if connected {
                        sock.send_blocking(&message, reliable)
                    } else {
                        sock.send_to_blocking(&message, server, reliable)
                    }
                })
                .await?
            }
            Style::Callback => {
                let report = |r: &reliable_udp::Result<usize>| {
                    if let Ok(n) = r {
                        println!("number of bytes sent: {n}");
                    }
                };
                let op = if connected {
                    socket.begin_send(message, reliable, report)
                } else {
                    socket.begin_send_to(message, server, reliable, report)
                };
                op.await
            }
        };
        sent.with_context(|| format!("sending message {i}"))?;
    }

    // Give acks (and echoes) time to arrive.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while socket.pending_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let abandoned = socket.cancel_retransmissions();
    if abandoned > 0 {
        log::warn!("{abandoned} message(s) never acknowledged");
    }
    socket.close();
    recv_task.await?;
    Ok(())
}
