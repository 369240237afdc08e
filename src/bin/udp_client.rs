//! netpool UDP Client Binary
//!
//! Sends stdin lines to the server and prints datagrams that come back.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use netpool::{Config, UdpClient};
use tracing_subscriber::{fmt, EnvFilter};

/// netpool UDP client
#[derive(Parser, Debug)]
#[command(name = "netpool-udp-client")]
#[command(about = "Interactive UDP client")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1")]
    ip: String,

    /// Server port
    #[arg(short, long, default_value = "9999")]
    port: u16,

    /// Local port to bind (0 = ephemeral)
    #[arg(short, long, default_value = "0")]
    local_port: u16,
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

    let client = Arc::new(UdpClient::new(Config::default()));

    client.set_message_callback(|sender, message| {
        println!("\r[From {}] {}", sender, String::from_utf8_lossy(message));
        prompt();
    });

    let running = Arc::new(AtomicBool::new(true));
    let signal_running = Arc::clone(&running);
    let signal_client = Arc::clone(&client);
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, closing...");
        signal_running.store(false, Ordering::SeqCst);
        signal_client.close();
    }) {
        tracing::warn!("Failed to install Ctrl+C handler: {}", e);
    }

    if let Err(e) = client.init(args.local_port) {
        tracing::error!("Failed to initialize client: {}", e);
        std::process::exit(1);
    }
    if let Err(e) = client.start_receiving() {
        tracing::error!("Failed to start receiving: {}", e);
        std::process::exit(1);
    }

    println!("Target server: {}:{}", args.ip, args.port);
    println!("Enter messages to send (empty line or /quit to exit)");
    prompt();

    let lines = spawn_stdin_reader();
    while running.load(Ordering::SeqCst) && client.is_initialized() {
        let line = match lines.recv_timeout(Duration::from_millis(100)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if line.is_empty() || line.trim() == "/quit" {
            break;
        }
        if let Err(e) = client.send_to(&args.ip, args.port, line.as_bytes()) {
            eprintln!("Failed to send message: {}", e);
        }
        prompt();
    }

    client.close();
    tracing::info!("Client shutdown complete");
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
