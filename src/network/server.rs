//! UNIX socket server
//!
//! Accepts connections and dispatches to worker threads.

use std::fs;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::config::Config;
use crate::error::{HearthError, Result};
use crate::storage::Store;

use super::Connection;

/// Message sent to worker threads
enum WorkerMessage {
    /// New client connection to handle
    NewConnection(UnixStream),
    /// Signal to shutdown
    Shutdown,
}

/// UNIX domain socket server for HearthKV
///
/// ## Architecture
/// - Main thread accepts connections
/// - Worker thread pool handles client I/O, one connection per worker at a
///   time (per-connection state stays single-owner)
/// - Shared Store reference for all workers
pub struct Server {
    /// Server configuration
    config: Config,

    /// Shared storage engine
    store: Arc<Store>,

    /// Socket listener (created on run)
    listener: Option<UnixListener>,

    /// Channel to send work to workers
    work_sender: Option<Sender<WorkerMessage>>,

    /// Worker thread handles
    workers: Vec<JoinHandle<()>>,

    /// Shutdown flag, observed by the accept loop and every readiness wait
    shutdown: Arc<AtomicBool>,

    /// Active connection count
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server with the given config and store
    pub fn new(config: Config, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            listener: None,
            work_sender: None,
            workers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start the server (blocking)
    ///
    /// This method:
    /// 1. Unlinks any stale socket file and binds the configured path
    /// 2. Spawns worker threads
    /// 3. Accepts connections in a loop
    /// 4. Returns when shutdown is signaled
    pub fn run(&mut self) -> Result<()> {
        let socket_path = self.config.socket_path.clone();

        // A previous run may have left its socket file behind.
        if socket_path.exists() {
            fs::remove_file(&socket_path).map_err(|e| {
                HearthError::Socket(format!(
                    "failed to unlink stale socket {}: {e}",
                    socket_path.display()
                ))
            })?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            HearthError::Socket(format!("failed to bind {}: {e}", socket_path.display()))
        })?;

        // Non-blocking so the accept loop can check the shutdown flag.
        listener
            .set_nonblocking(true)
            .map_err(|e| HearthError::Socket(format!("set_nonblocking: {e}")))?;

        tracing::info!("server listening on {}", socket_path.display());
        self.listener = Some(listener);

        // Worker thread pool
        let num_workers = if self.config.worker_threads == 0 {
            num_cpus()
        } else {
            self.config.worker_threads
        };
        let (sender, receiver) = bounded::<WorkerMessage>(self.config.max_connections);
        self.work_sender = Some(sender);

        tracing::info!("starting {} worker threads", num_workers);

        let conn_ids = Arc::new(AtomicU64::new(0));
        for worker_id in 0..num_workers {
            let worker = Worker {
                id: worker_id,
                receiver: receiver.clone(),
                store: Arc::clone(&self.store),
                shutdown: Arc::clone(&self.shutdown),
                active_connections: Arc::clone(&self.active_connections),
                conn_ids: Arc::clone(&conn_ids),
                config: self.config.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("hearthkv-worker-{worker_id}"))
                .spawn(move || worker.run())
                .map_err(|e| HearthError::Socket(format!("failed to spawn worker: {e}")))?;

            self.workers.push(handle);
        }

        self.accept_loop();

        // Cleanup (after shutdown signaled)
        self.cleanup();

        Ok(())
    }

    /// Main accept loop
    fn accept_loop(&mut self) {
        let listener = self.listener.as_ref().unwrap();
        let sender = self.work_sender.as_ref().unwrap();

        while !self.shutdown.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    let current = self.active_connections.load(Ordering::Relaxed);
                    if current >= self.config.max_connections {
                        tracing::warn!(
                            "connection limit reached ({}/{}), rejecting",
                            current,
                            self.config.max_connections
                        );
                        drop(stream);
                        continue;
                    }

                    tracing::debug!("accepted connection");

                    if let Err(e) = sender.send(WorkerMessage::NewConnection(stream)) {
                        tracing::error!("failed to dispatch connection: {}", e);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No pending connections; sleep briefly.
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    if !self.shutdown.load(Ordering::Relaxed) {
                        tracing::error!("accept error: {}", e);
                    }
                }
            }
        }
    }

    /// Cleanup workers and resources
    fn cleanup(&mut self) {
        tracing::info!("shutting down server...");

        if let Some(sender) = &self.work_sender {
            for _ in 0..self.workers.len() {
                let _ = sender.send(WorkerMessage::Shutdown);
            }
        }

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.join() {
                tracing::error!("worker thread panicked: {:?}", e);
            }
        }

        let _ = fs::remove_file(&self.config.socket_path);

        tracing::info!("server shutdown complete");
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        tracing::info!("shutdown signal received");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Shared flag for the embedding harness's signal handler
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Get the number of active connections
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// Worker thread that handles client connections
struct Worker {
    /// Worker ID for logging
    id: usize,

    /// Channel to receive work
    receiver: Receiver<WorkerMessage>,

    /// Shared store reference
    store: Arc<Store>,

    /// Process-wide shutdown flag, handed to every connection
    shutdown: Arc<AtomicBool>,

    /// Active connection counter
    active_connections: Arc<AtomicUsize>,

    /// Connection ID source, shared across workers
    conn_ids: Arc<AtomicU64>,

    /// Connection settings (timeouts, payload ceiling)
    config: Config,
}

impl Worker {
    fn run(self) {
        tracing::debug!("worker {} started", self.id);

        loop {
            match self.receiver.recv() {
                Ok(WorkerMessage::NewConnection(stream)) => {
                    self.handle_connection(stream);
                }
                Ok(WorkerMessage::Shutdown) => {
                    tracing::debug!("worker {} received shutdown signal", self.id);
                    break;
                }
                Err(_) => {
                    // Channel closed
                    tracing::debug!("worker {} channel closed", self.id);
                    break;
                }
            }
        }

        tracing::debug!("worker {} stopped", self.id);
    }

    /// Run one connection to completion; the socket closes exactly once,
    /// when the handler drops at the end of this call
    fn handle_connection(&self, stream: UnixStream) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        let conn_id = self.conn_ids.fetch_add(1, Ordering::Relaxed);

        match Connection::new(
            stream,
            Arc::clone(&self.store),
            Arc::clone(&self.shutdown),
            &self.config,
            conn_id,
        ) {
            Ok(mut conn) => match conn.handle() {
                Ok(()) => {
                    tracing::debug!(conn = conn_id, "connection closed by peer");
                }
                Err(
                    e @ (HearthError::PeerClosed | HearthError::Timeout | HearthError::Shutdown),
                ) => {
                    tracing::debug!(conn = conn_id, reason = %e, "connection ended");
                }
                Err(e) => {
                    tracing::warn!(conn = conn_id, error = %e, "connection terminated");
                }
            },
            Err(e) => {
                tracing::error!(conn = conn_id, error = %e, "failed to set up connection");
            }
        }

        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Get number of CPUs (for worker thread count)
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}
