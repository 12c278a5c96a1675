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

//! Resolution backends.
//!
//! The server hands every well-formed request to a [`Resolver`], which
//! produces the response to send back. Two are provided:
//! [`NxdomainResolver`] answers everything locally with NXDOMAIN, and
//! [`ForwardingResolver`] relays requests to an upstream server.

mod forward;
mod nxdomain;
pub use forward::{ForwardingResolver, DEFAULT_TIMEOUT};
pub use nxdomain::NxdomainResolver;

use std::fmt;
use std::io;

use crate::message::{writer, Message};

/// A source of responses to DNS requests.
///
/// Resolvers are shared between all concurrently running request
/// handlers, so they must be [`Send`] and [`Sync`].
pub trait Resolver: Send + Sync {
    /// Produces a response to `request`. The request is not modified.
    fn resolve(&self, request: &Message) -> Result<Message, Error>;
}

impl<R: Resolver + ?Sized> Resolver for Box<R> {
    fn resolve(&self, request: &Message) -> Result<Message, Error> {
        (**self).resolve(request)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a [`Resolver`] could not produce a response.
#[derive(Debug)]
pub enum Error {
    /// The request could not be serialized for forwarding.
    Serialize(writer::Error),

    /// An I/O error occurred while talking to an upstream server.
    Io(io::Error),

    /// No matching response arrived from the upstream server in time.
    Timeout,
}

impl From<writer::Error> for Error {
    fn from(err: writer::Error) -> Self {
        Self::Serialize(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Serialize(err) => write!(f, "failed to serialize request: {}", err),
            Self::Io(err) => write!(f, "upstream I/O error: {}", err),
            Self::Timeout => f.write_str("timed out waiting for upstream"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialize(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Timeout => None,
        }
    }
}
