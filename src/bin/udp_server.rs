//! netpool UDP Server Binary
//!
//! Echo server with an interactive console.
//!
//! Console commands:
//!   /send <ip> <port> <msg>   send to an address
//!   /reply <msg>              send to the last sender
//!   /quit                     stop and exit

use std::io::{self, BufRead, Write};
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use netpool::{Config, UdpServer};
use parking_lot::Mutex;
use tracing_subscriber::{fmt, EnvFilter};

/// netpool UDP echo server
#[derive(Parser, Debug)]
#[command(name = "netpool-udp-server")]
#[command(about = "UDP echo server backed by a worker pool")]
#[command(version)]
struct Args {
    /// Address to bind
    #[arg(short, long, default_value = "0.0.0.0")]
    ip: String,

    /// Port to bind
    #[arg(short, long, default_value = "9999")]
    port: u16,

    /// Worker threads
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

    tracing::info!("netpool UDP server v{}", netpool::VERSION);

    let config = Config::builder().worker_threads(args.workers).build();
    let server = match UdpServer::new(&args.ip, args.port, config) {
        Ok(server) => Arc::new(server),
        Err(e) => {
            tracing::error!("Failed to create server: {}", e);
            std::process::exit(1);
        }
    };

    // Owned by this driver, not by the library.
    let last_sender: Arc<Mutex<Option<SocketAddrV4>>> = Arc::new(Mutex::new(None));

    let replies = server.handle();
    let record_sender = Arc::clone(&last_sender);
    server.set_message_callback(move |sender, message| {
        println!("\r[From {}] {}", sender, String::from_utf8_lossy(message));
        prompt();

        *record_sender.lock() = Some(sender);

        let mut response = b"[Echo] ".to_vec();
        response.extend_from_slice(message);
        if let Err(e) = replies.reply(sender, &response) {
            tracing::debug!("Echo to {} failed: {}", sender, e);
        }
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

    println!("Commands: /send <ip> <port> <msg> | /reply <msg> | /quit");
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
        } else if let Some(message) = input.strip_prefix("/reply ") {
            let target = *last_sender.lock();
            match target {
                Some(sender) => {
                    let formatted = format!("[Server] {}", message);
                    match server.send_to(&sender.ip().to_string(), sender.port(), formatted.as_bytes()) {
                        Ok(()) => println!("[Reply to {}] {}", sender, message),
                        Err(e) => eprintln!("[Error] Reply failed: {}", e),
                    }
                }
                None => eprintln!("[Error] No client has sent a message yet"),
            }
        } else if let Some(rest) = input.strip_prefix("/send ") {
            match parse_send(rest) {
                Some((ip, port, message)) => {
                    let formatted = format!("[Server] {}", message);
                    match server.send_to(ip, port, formatted.as_bytes()) {
                        Ok(()) => println!("[Sent to {}:{}] {}", ip, port, message),
                        Err(e) => eprintln!("[Error] Send failed: {}", e),
                    }
                }
                None => eprintln!("[Error] Usage: /send <ip> <port> <message>"),
            }
        } else {
            eprintln!("[Error] Unknown input. Use /send, /reply or /quit");
        }
        prompt();
    }

    server.stop();
    tracing::info!("Server stopped");
}

/// Parse `<ip> <port> <message>`
fn parse_send(rest: &str) -> Option<(&str, u16, &str)> {
    let mut parts = rest.trim().splitn(3, char::is_whitespace);
    let ip = parts.next()?;
    let port = parts.next()?.parse().ok()?;
    let message = parts.next()?.trim_start();
    if message.is_empty() {
        return None;
    }
    Some((ip, port, message))
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
