// Copyright 2021 Matthew Ingwersen.
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

//! A DNS query observer.
//!
//! This crate receives DNS queries over UDP, logs each query's question
//! (optionally decoding hex-encoded labels in front of a known suffix),
//! and answers it through a pluggable [`Resolver`](resolver::Resolver).
//! It is meant for inspecting traffic whose query names carry data.
//!
//! The main pieces are:
//!
//! * the wire codec in [`message`], [`name`], [`rr`] and [`class`];
//! * the [`logger`], which renders questions and writes request lines;
//! * the [`resolver`]s that produce responses;
//! * the [`Server`](server::Server), which ties the above together for
//!   a single datagram; and
//! * the [`io`] providers, which run a server on the network.

pub mod class;
pub mod io;
pub mod logger;
pub mod message;
pub mod name;
pub mod resolver;
pub mod rr;
pub mod server;
pub mod thread;
mod util;
