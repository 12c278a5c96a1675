// Copyright 2022 Matthew Ingwersen.
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

//! Implementation of the blocking I/O provider.

// NOTE: I/O errors on receive end the receiver's task, which makes the
// thread respawn (after a delay if the last respawn was recent). Send
// errors only affect the datagram being answered; they are logged and
// otherwise ignored.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, warn};

use super::MAX_DATAGRAM_SIZE;
use crate::resolver::Resolver;
use crate::server::{Response, Server};
use crate::thread::{HandlerPool, HandlerPoolConfig, ThreadGroup};
use crate::util::retry_if_interrupted;

/// A blocking I/O provider.
///
/// This provider uses blocking I/O from the standard library. Each
/// bound socket gets a receiver thread, which hands every datagram to
/// its own handler invocation on a [`HandlerPool`]: a permanent worker
/// if one is idle, otherwise a fresh thread. The receiver never waits
/// for handlers to finish.
///
/// To stop the provider, shut down the [`ThreadGroup`] it was started
/// in (see [`BlockingIoProvider::start`]). Receivers notice within
/// [`CHECK_FOR_SHUTDOWN_TIMEOUT`].
pub struct BlockingIoProvider {
    config: BlockingIoConfig,
    sockets: Vec<Arc<UdpSocket>>,
}

/// Configuration options for the [`BlockingIoProvider`].
#[derive(Clone, Debug)]
pub struct BlockingIoConfig {
    /// The number of permanent handler threads to keep. Datagrams that
    /// arrive while all of them are busy get a temporary thread each.
    pub base_workers: usize,

    /// The maximum number of datagrams handled at once. Datagrams
    /// received beyond this are dropped. [`None`] means no limit.
    pub max_in_flight: Option<usize>,
}

impl Default for BlockingIoConfig {
    fn default() -> Self {
        Self {
            base_workers: 2,
            max_in_flight: None,
        }
    }
}

impl BlockingIoProvider {
    /// Creates a new `BlockingIoProvider`. This call binds UDP sockets
    /// in preparation, but does not start the server.
    pub fn bind<A>(config: BlockingIoConfig, addrs: A) -> io::Result<Self>
    where
        A: IntoIterator<Item = SocketAddr>,
    {
        let mut sockets = Vec::new();
        for addr in addrs {
            let socket = UdpSocket::bind(addr)?;
            socket.set_read_timeout(Some(CHECK_FOR_SHUTDOWN_TIMEOUT))?;
            sockets.push(Arc::new(socket));
        }
        Ok(Self { config, sockets })
    }

    /// Returns the local addresses of the bound sockets.
    pub fn local_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        self.sockets.iter().map(|s| s.local_addr()).collect()
    }

    /// Starts the server on the provided [`ThreadGroup`]. The server
    /// can be shut down later by shutting down that group.
    pub fn start<R>(
        self,
        server: &Arc<Server<R>>,
        group: &Arc<ThreadGroup>,
    ) -> Result<(), crate::thread::Error>
    where
        R: Resolver + 'static,
    {
        let pool = group.start_handler_pool(HandlerPoolConfig {
            name: "udp handler".to_owned(),
            workers: self.config.base_workers,
            max_in_flight: self.config.max_in_flight,
        })?;

        for (i, socket) in self.sockets.into_iter().enumerate() {
            let name = format!("udp receiver {}", i);
            let group_clone = group.clone();
            let pool = pool.clone();
            let server = server.clone();
            let task = move || {
                log_io_errors(run_udp_receiver(&group_clone, &pool, &server, &socket));
            };
            group.spawn_respawnable(name, task)?;
        }
        Ok(())
    }
}

/// The timeout on UDP receive operations. Receiver threads check for
/// thread group shutdown between receives, so this is the longest a
/// shutdown has to wait for them.
pub const CHECK_FOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// The UDP receive loop.
fn run_udp_receiver<R>(
    group: &ThreadGroup,
    pool: &Arc<HandlerPool>,
    server: &Arc<Server<R>>,
    socket: &Arc<UdpSocket>,
) -> io::Result<()>
where
    R: Resolver + 'static,
{
    let mut received_buf = vec![0; MAX_DATAGRAM_SIZE];

    loop {
        if group.is_shutting_down() {
            return Ok(());
        }

        // If interrupted, check for shutdown again before retrying, so
        // that repeated interruptions cannot keep us from noticing it.
        let (received_len, src) = match socket.recv_from(&mut received_buf) {
            Ok(pair) => pair,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        let datagram = received_buf[..received_len].to_vec();
        let server = server.clone();
        let socket = socket.clone();
        let handler = move || match server.handle_message(&datagram, src) {
            Response::Single(response) => {
                log_io_errors(retry_if_interrupted(|| socket.send_to(&response, src)));
            }
            Response::None => (),
        };

        match pool.submit(handler) {
            Ok(()) => (),
            Err(crate::thread::Error::Saturated) => {
                warn!("Dropping datagram from {}: too many requests in flight", src);
            }
            Err(crate::thread::Error::ShuttingDown) => return Ok(()),
            Err(crate::thread::Error::Io(e)) => return Err(e),
        }
    }
}

/// Logs errors if a task exits with an I/O error.
fn log_io_errors<T>(result: io::Result<T>) {
    if let Err(e) = result {
        let current_thread = thread::current();
        let thread_name = current_thread.name().unwrap_or("anonymous thread");
        error!("I/O error in thread {}: {}", thread_name, e);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
