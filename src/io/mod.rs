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

//! I/O providers for running [`Server`s](crate::server::Server).
//!
//! The [`Server`](crate::server::Server) structure and its methods
//! implement request handling abstracted from network I/O. An I/O
//! provider binds the UDP sockets, feeds each received datagram to the
//! [`Server`](crate::server::Server) on its own unit of concurrency, and
//! sends back whatever response it produces. The providers differ in
//! the I/O APIs they use and in what that unit is.

mod blocking;
#[cfg(feature = "tokio")]
mod tokio;

pub use blocking::{BlockingIoConfig, BlockingIoProvider, CHECK_FOR_SHUTDOWN_TIMEOUT};
#[cfg(feature = "tokio")]
pub use self::tokio::{TokioIoConfig, TokioIoProvider, TokioShutdownController};

/// The size of the buffers datagrams are received into. This is the
/// largest UDP payload possible.
pub(crate) const MAX_DATAGRAM_SIZE: usize = 65535;
