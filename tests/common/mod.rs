#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary only uses part of the shared helpers"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use floatchat_client::ws::config::{Config, ReconnectConfig};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

/// What the mock server does on a connection.
#[derive(Clone, Debug)]
pub enum Command {
    /// Send a text frame
    Text(String),
    /// Send a close frame and drop the connection
    Close,
}

type Script = Arc<dyn Fn(&str) -> Vec<Command> + Send + Sync>;

/// Mock WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast commands to ALL connected clients
    command_tx: broadcast::Sender<Command>,
    /// Receives text frames sent by clients
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Number of completed handshakes
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port that never replies on its own.
    pub async fn start() -> Self {
        Self::with_script(|_| Vec::new()).await
    }

    /// Start a mock server that answers every client text frame with `script(frame)`.
    pub async fn with_script<F>(script: F) -> Self
    where
        F: Fn(&str) -> Vec<Command> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, script)
    }

    /// Start a silent mock server on a specific address, e.g. one a client is already retrying.
    pub async fn start_on(addr: SocketAddr) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, |_| Vec::new())
    }

    fn serve<F>(listener: TcpListener, script: F) -> Self
    where
        F: Fn(&str) -> Vec<Command> + Send + Sync + 'static,
    {
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let connections = Arc::new(AtomicUsize::new(0));
        let script: Script = Arc::new(script);

        let broadcast_tx = command_tx.clone();
        let connection_count = Arc::clone(&connections);

        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let mut command_rx = broadcast_tx.subscribe();
                let script = Arc::clone(&script);
                connection_count.fetch_add(1, Ordering::SeqCst);

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    loop {
                        let commands = tokio::select! {
                            // Handle incoming messages from client
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    let text = text.to_string();
                                    let replies = script(&text);
                                    drop(received_tx.send(text));
                                    replies
                                }
                                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                Some(Ok(_)) => Vec::new(),
                            },
                            // Handle commands for all clients
                            cmd = command_rx.recv() => match cmd {
                                Ok(command) => vec![command],
                                Err(_) => break,
                            },
                        };

                        for command in commands {
                            match command {
                                Command::Text(text) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        return;
                                    }
                                }
                                Command::Close => {
                                    drop(write.send(Message::Close(None)).await);
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
            connections,
            accept_task,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.command_tx.send(Command::Text(message.to_owned())));
    }

    /// Close every connected client.
    pub fn close_all(&self) {
        drop(self.command_tx.send(Command::Close));
    }

    /// Number of handshakes completed so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` handshakes have completed.
    pub async fn wait_for_connections(&self, count: usize) {
        timeout(Duration::from_secs(5), async {
            while self.connection_count() < count {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Receive the next frame sent by a client.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.recv_frame_within(Duration::from_secs(2)).await
    }

    pub async fn recv_frame_within(&mut self, wait: Duration) -> Option<String> {
        timeout(wait, self.received_rx.recv()).await.ok().flatten()
    }

    /// Stop accepting connections; new connection attempts are refused afterwards.
    pub async fn stop_accepting(&mut self) {
        self.accept_task.abort();
        drop((&mut self.accept_task).await);
    }
}

/// A listener that accepts TCP connections but never completes a WebSocket handshake.
pub async fn silent_server() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    (format!("ws://{addr}/ws"), handle)
}

/// Completes one handshake and closes that connection right away. Every later connection
/// is accepted at the TCP level but never gets a handshake response.
///
/// Returns the endpoint, the number of completed handshakes and the server task.
pub async fn close_then_stall_server() -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handshakes = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&handshakes);

    let handle = tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        if let Ok(mut ws_stream) = tokio_tungstenite::accept_async(stream).await {
            count.fetch_add(1, Ordering::SeqCst);
            drop(ws_stream.send(Message::Close(None)).await);
        }

        let mut held: Vec<TcpStream> = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    (format!("ws://{addr}/ws"), handshakes, handle)
}

/// An address nobody listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// An endpoint on a port nobody listens on.
pub async fn refused_url() -> String {
    format!("ws://{}/ws", unused_addr().await)
}

/// A config with short timings so reconnection tests run quickly.
pub fn config(endpoint: &str, max_attempts: Option<u32>, base_delay: Duration) -> Config {
    Config::builder()
        .endpoint(endpoint)
        .connect_timeout(Duration::from_secs(2))
        .reconnect(ReconnectConfig::new(max_attempts, base_delay))
        .build()
}
