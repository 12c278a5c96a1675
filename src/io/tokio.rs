// Copyright 2023 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implementation of the Tokio I/O provider.

// NOTE: In this provider, I/O error handling is generally to exit the
// task. The run_with_respawning function acts as a supervisor that will
// respawn the UDP receivers, possibly after a delay, if they exit with
// an error or a panic.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, warn};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Semaphore};

use super::MAX_DATAGRAM_SIZE;
use crate::resolver::Resolver;
use crate::server::{Response, Server};

/// A Tokio I/O provider.
///
/// This provider receives datagrams with asynchronous I/O on a Tokio
/// runtime. Since request handling (and in particular forwarding) is
/// blocking, each datagram is handled on the runtime's blocking thread
/// pool through [`tokio::task::spawn_blocking`].
///
/// The `TokioIoProvider` supports graceful shutdown. To initiate a
/// graceful shutdown, use the [`TokioShutdownController`] returned by
/// [`TokioIoProvider::start`].
pub struct TokioIoProvider {
    config: TokioIoConfig,
    sockets: Vec<Arc<UdpSocket>>,
}

/// Configuration options for the [`TokioIoProvider`].
#[derive(Clone, Debug, Default)]
pub struct TokioIoConfig {
    /// The maximum number of datagrams handled at once. Datagrams
    /// received beyond this are dropped. [`None`] means no limit.
    pub max_in_flight: Option<usize>,
}

impl TokioIoProvider {
    /// Creates a new `TokioIoProvider`. This call binds UDP sockets in
    /// preparation, but does not start the server. This function
    /// requires that the Tokio runtime be active.
    pub async fn bind<A>(config: TokioIoConfig, addrs: A) -> io::Result<Self>
    where
        A: IntoIterator<Item = SocketAddr>,
    {
        let mut sockets = Vec::new();
        for addr in addrs {
            sockets.push(Arc::new(UdpSocket::bind(addr).await?));
        }
        Ok(Self { config, sockets })
    }

    /// Returns the local addresses of the bound sockets.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.sockets.iter().map(|s| s.local_addr()).collect()
    }

    /// Starts the server on the active Tokio runtime.
    ///
    /// This spawns tasks on the active Tokio runtime and then returns
    /// a [`TokioShutdownController`] that can be used to shut down the
    /// tasks at a later time. (The [`TokioShutdownController`] must be
    /// held as long as the server should be running, since dropping it
    /// will trigger shutdown.)
    pub fn start<R>(self, server: &Arc<Server<R>>) -> TokioShutdownController
    where
        R: Resolver + 'static,
    {
        let (shutdown_controller, shutdown_handle) = make_shutdown_channels();
        let limit = self
            .config
            .max_in_flight
            .map(|max| Arc::new(Semaphore::new(max)));

        for socket in self.sockets {
            let receiver = UdpReceiver {
                socket,
                limit: limit.clone(),
            };
            tokio::spawn(run_with_respawning(
                run_udp_receiver,
                shutdown_handle.clone(),
                server.clone(),
                receiver,
            ));
        }

        shutdown_controller
    }
}

/// What a UDP receiver task needs besides the server: its socket and
/// the shared in-flight limit, if any.
#[derive(Clone)]
struct UdpReceiver {
    socket: Arc<UdpSocket>,
    limit: Option<Arc<Semaphore>>,
}

/// How long to wait between respawns of a task. This is to prevent
/// tasks that crash immediately from using up significant CPU time.
const TASK_RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// Runs a Tokio task, respawning it if it returns an I/O error, is
/// cancelled, or panics.
async fn run_with_respawning<F, G, R, S>(
    f: F,
    mut shutdown: ShutdownHandle,
    server: Arc<Server<R>>,
    state: S,
) where
    F: Fn(ShutdownHandle, Arc<Server<R>>, S) -> G,
    G: Future<Output = io::Result<()>> + Send + 'static,
    S: Clone,
{
    loop {
        let last_spawn_time = Instant::now();
        match tokio::spawn(f(shutdown.clone(), server.clone(), state.clone())).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => log_io_error(e),
            Err(_) => (), // The task panicked or was cancelled.
        }

        // If necessary, wait before respawning, but receive shutdown
        // requests immediately.
        let since_last_spawn = Instant::now().duration_since(last_spawn_time);
        if let Some(duration_to_wait) = TASK_RESPAWN_DELAY.checked_sub(since_last_spawn) {
            tokio::select! {
                _ = shutdown.request_receiver.recv() => return,
                _ = tokio::time::sleep(duration_to_wait) => (),
            }
        }
    }
}

/// The UDP receiver loop.
async fn run_udp_receiver<R>(
    mut shutdown: ShutdownHandle,
    server: Arc<Server<R>>,
    receiver: UdpReceiver,
) -> io::Result<()>
where
    R: Resolver + 'static,
{
    let mut received_buf = vec![0; MAX_DATAGRAM_SIZE];
    loop {
        // Receive a datagram (or a shutdown request).
        let (received_len, src) = tokio::select! {
            _ = shutdown.request_receiver.recv() => return Ok(()),
            res = receiver.socket.recv_from(&mut received_buf) => res?,
        };

        let permit = match &receiver.limit {
            Some(limit) => match limit.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!("Dropping datagram from {}: too many requests in flight", src);
                    continue;
                }
            },
            None => None,
        };

        // In a new Tokio task, process the datagram on the blocking
        // pool and send the response (if any).
        let datagram = received_buf[..received_len].to_vec();
        let wait_sender = shutdown.wait_sender.clone();
        let server = server.clone();
        let socket = receiver.socket.clone();
        tokio::spawn(async move {
            let handled =
                tokio::task::spawn_blocking(move || server.handle_message(&datagram, src))
                    .await;
            match handled {
                Ok(Response::Single(response)) => {
                    if let Err(e) = socket.send_to(&response, src).await {
                        log_io_error(e);
                    }
                }
                Ok(Response::None) => (),
                Err(e) => error!("Handler for datagram from {} failed: {}", src, e),
            }

            // This ensures that the permit and the shutdown handle are
            // moved into the new task.
            drop(permit);
            drop(wait_sender);
        });
    }
}

/// Controls the shutdown of a server's Tokio tasks.
///
/// This type is used to shut down the Tokio tasks spawned by
/// [`TokioIoProvider::start`]. Use
/// [`TokioShutdownController::shut_down`] or its blocking variant,
/// [`TokioShutdownController::blocking_shut_down`], to initiate
/// shutdown and wait for its completion. Dropping the controller will
/// also trigger shutdown (but will not wait for it to complete).
#[must_use]
pub struct TokioShutdownController {
    request_sender: broadcast::Sender<()>,
    wait_receiver: mpsc::Receiver<()>,
}

impl TokioShutdownController {
    /// Requests that running server tasks shut down, and then waits for
    /// them (including in-flight handlers) to terminate.
    pub async fn shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.recv().await;
    }

    /// The blocking variant of [`TokioShutdownController::shut_down`].
    pub fn blocking_shut_down(mut self) {
        drop(self.request_sender);
        let _ = self.wait_receiver.blocking_recv();
    }
}

/// A handle held by tasks to interact with the graceful shutdown
/// mechanism.
///
/// Tasks learn of shutdown when every sender attached to
/// `request_receiver` has closed. Shutdown completes only once every
/// `wait_sender` clone has been dropped, so each task (including each
/// datagram handler) keeps one.
struct ShutdownHandle {
    request_receiver: broadcast::Receiver<()>,
    wait_sender: mpsc::Sender<()>,
}

impl Clone for ShutdownHandle {
    fn clone(&self) -> Self {
        // A resubscribed receiver misses queued values, which does not
        // matter here: the signal is the senders closing.
        ShutdownHandle {
            request_receiver: self.request_receiver.resubscribe(),
            wait_sender: self.wait_sender.clone(),
        }
    }
}

/// Produces a [`TokioShutdownController`] and an initial
/// [`ShutdownHandle`] connected to it.
fn make_shutdown_channels() -> (TokioShutdownController, ShutdownHandle) {
    let (request_sender, request_receiver) = broadcast::channel(1);
    let (wait_sender, wait_receiver) = mpsc::channel(1);
    let controller = TokioShutdownController {
        request_sender,
        wait_receiver,
    };
    let handle = ShutdownHandle {
        request_receiver,
        wait_sender,
    };
    (controller, handle)
}

/// Logs an I/O error.
fn log_io_error(e: io::Error) {
    error!("I/O error: {}", e);
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
