//! netpool TCP Server Binary
//!
//! Echo server with an interactive console.
//!
//! Console commands:
//!   <message>          broadcast to every client
//!   /send <id> <msg>   send to one client
//!   /list              list connected clients
//!   /quit              stop and exit

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use netpool::{Config, ConnectionId, TcpServer};
use tracing_subscriber::{fmt, EnvFilter};

/// netpool TCP echo server
#[derive(Parser, Debug)]
#[command(name = "netpool-tcp-server")]
#[command(about = "Multi-client TCP echo server backed by a worker pool")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    ip: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8888")]
    port: u16,

    /// Worker threads (one per concurrently served client)
    #[arg(short, long, default_value = "4")]
    workers: usize,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netpool=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("netpool TCP server v{}", netpool::VERSION);

    let config = Config::builder().worker_threads(args.workers).build();
    let server = match TcpServer::new(&args.ip, args.port, config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    server.set_connection_callback(|id, addr| {
        println!("\r[Callback] New connection: id={}, addr={}", id, addr);
        prompt();
    });

    let replies = server.handle();
    server.set_message_callback(move |id, message| {
        println!("\r[Client id={}] {}", id, String::from_utf8_lossy(message));
        prompt();

        let mut response = b"[Echo] ".to_vec();
        response.extend_from_slice(message);
        if let Err(e) = replies.send_to(id, &response) {
            tracing::debug!("Echo to {} failed: {}", id, e);
        }
    });

    server.set_disconnect_callback(|id| {
        println!("\r[Callback] Client disconnected: id={}", id);
        prompt();
    });

    let running = Arc::new(AtomicBool::new(true));
    let signal_running = Arc::clone(&running);
    let signal_server = Arc::clone(&server);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        signal_running.store(false, Ordering::SeqCst);
        signal_server.stop();
    }) {
        tracing::warn!("Failed to install Ctrl+C handler: {}", e);
    }

    if let Err(e) = server.start() {
        tracing::error!("Failed to start server: {}", e);
        std::process::exit(1);
    }

    println!("Commands: <message> | /send <id> <msg> | /list | /quit");
    prompt();

    let lines = spawn_stdin_reader();
    while running.load(Ordering::SeqCst) && server.is_running() {
        let line = match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let input = line.trim();

        if input.is_empty() {
            prompt();
            continue;
        }

        if input == "/quit" {
            break;
        } else if input == "/list" {
            let clients = server.clients();
            if clients.is_empty() {
                println!("[Info] No clients connected.");
            } else {
                println!("[Info] Connected clients ({}):", clients.len());
                for client in clients {
                    println!("  id={} -> {}", client.id, client.addr);
                }
            }
        } else if let Some(rest) = input.strip_prefix("/send ") {
            match parse_send(rest) {
                Some((id, message)) => {
                    let formatted = format!("[Server] {}", message);
                    match server.send_to(id, formatted.as_bytes()) {
                        Ok(()) => println!("[Sent to id={}] {}", id, message),
                        Err(e) => eprintln!("[Error] Failed to send to id={}: {}", id, e),
                    }
                }
                None => eprintln!("[Error] Usage: /send <id> <message>"),
            }
        } else {
            let formatted = format!("[Server] {}", input);
            match server.broadcast(formatted.as_bytes()) {
                Ok(count) => println!("[Broadcast to {}] {}", count, input),
                Err(e) => eprintln!("[Error] Broadcast failed: {}", e),
            }
        }
        prompt();
    }

    server.stop();
    tracing::info!("Server stopped");
}

/// Parse `<id> <message>`
fn parse_send(rest: &str) -> Option<(ConnectionId, &str)> {
    let (id, message) = rest.trim().split_once(char::is_whitespace)?;
    let id: u64 = id.parse().ok()?;
    let message = message.trim_start();
    if message.is_empty() {
        return None;
    }
    Some((ConnectionId::from(id), message))
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

/// Forward stdin lines over a channel so the main loop can poll for shutdown
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = channel::unbounded();
    thread::spawn(move || forward_lines(io::stdin().lock(), &tx));
    rx
}

/// Send each line until input ends, a read fails or the receiver hangs up
fn forward_lines(reader: impl BufRead, tx: &Sender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}
