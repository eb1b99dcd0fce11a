//! End-to-end chat benchmark for Huddle.
//!
//! Registers N WebSocket clients against a running server, has every client
//! broadcast continuously, and counts the chat messages delivered back.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{codec, Frame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Huddle end-to-end chat benchmark");
    println!("Make sure the server is running: cargo run --release --bin huddle");
    println!();

    run_chat_benchmark(num_clients).await;
}

async fn run_chat_benchmark(num_clients: usize) {
    println!("Broadcast benchmark: {} clients", num_clients);
    println!("  Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let delivered = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let delivered = Arc::clone(&delivered);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client_id, delivered, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients registered", num_clients);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    delivered.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = delivered.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results");
    println!("  Clients:          {:>10}", num_clients);
    println!("  Duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("  Messages:         {:>10}", total);
    println!("  Delivered:        {:>10.0} msg/s", per_sec);
    println!("  Per client:       {:>10.0} msg/s", per_sec / num_clients as f64);

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    delivered: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (mut sender, mut receiver) = ws.split();

    let register = codec::encode(&Frame::register(1, format!("bench-{client_id}")))?;
    sender.send(Message::Binary(register.to_vec())).await?;

    // Skip pushes until the register response arrives.
    let mut recv_buf = BytesMut::with_capacity(65536);
    'registered: while let Some(result) = receiver.next().await {
        if let Message::Binary(data) = result? {
            recv_buf.extend_from_slice(&data);
            while let Some(frame) = codec::decode_from(&mut recv_buf)? {
                match frame {
                    Frame::Ack { id: 1 } => break 'registered,
                    Frame::Error { message, .. } => return Err(message.into()),
                    _ => {}
                }
            }
        }
    }

    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Binary(data) = message {
                recv_buf.extend_from_slice(&data);
                while let Ok(Some(frame)) = codec::decode_from(&mut recv_buf) {
                    if matches!(frame, Frame::Message { .. }) {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    let mut id = 2u64;
    loop {
        let broadcast = codec::encode(&Frame::broadcast(id, "hello from the benchmark"))?;
        if sender.send(Message::Binary(broadcast.to_vec())).await.is_err() {
            break;
        }
        id += 1;
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
