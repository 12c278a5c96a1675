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

//! The request-handling logic of the observer.
//!
//! The [`Server`] structure is the heart of this module; see its
//! documentation for details.

use std::fmt;
use std::net::SocketAddr;

use log::{debug, error, warn};

use crate::logger::RequestLogger;
use crate::message::{reader, writer, Message};
use crate::resolver::{self, Resolver};

////////////////////////////////////////////////////////////////////////
// SERVER PUBLIC API AND CORE MESSAGE-HANDLING LOGIC                  //
////////////////////////////////////////////////////////////////////////

/// A DNS query observer, abstracted from any underlying network I/O
/// provider.
///
/// The [`Server`] receives, logs, and responds to DNS messages through
/// the [`Server::handle_message`] method. An underlying network I/O
/// provider is responsible for receiving these messages from the
/// network and then sending the responses that the [`Server`]
/// produces.
///
/// Each message is handled independently: the question is written to
/// the [`RequestLogger`], and the response comes from the [`Resolver`].
/// Nothing is retained between messages, so a single `Server` (usually
/// behind an [`Arc`](std::sync::Arc)) can handle any number of
/// messages concurrently.
pub struct Server<R> {
    resolver: R,
    logger: RequestLogger,
}

impl<R> Server<R> {
    /// Creates a new `Server` that logs to `logger` and answers with
    /// `resolver`.
    pub fn new(resolver: R, logger: RequestLogger) -> Self {
        Self { resolver, logger }
    }

    /// Returns the server's resolver.
    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}

impl<R> Server<R>
where
    R: Resolver,
{
    /// Handles a received DNS message. This is the API through which
    /// I/O providers submit messages.
    ///
    /// `received_buf` contains the message received from `src`. The
    /// message's question is logged, and the request is passed to the
    /// resolver. A [`Response`] is returned, signifying whether a
    /// response is to be sent to `src`.
    ///
    /// Messages that cannot be parsed are dropped without a response
    /// (and without a log line). If the resolver fails or its answer
    /// cannot be serialized, no response is sent either; the failure
    /// only affects this message.
    pub fn handle_message(&self, received_buf: &[u8], src: SocketAddr) -> Response {
        match self.try_handle_message(received_buf, src) {
            Ok(octets) => Response::Single(octets),
            Err(HandleError::Parse(e)) => {
                debug!("dropping malformed message from {}: {}", src, e);
                Response::None
            }
            Err(e) => {
                warn!("no response to {}: {}", src, e);
                Response::None
            }
        }
    }

    fn try_handle_message(
        &self,
        received_buf: &[u8],
        src: SocketAddr,
    ) -> Result<Vec<u8>, HandleError> {
        let request = Message::parse(received_buf).map_err(HandleError::Parse)?;

        // The logger gets its own copy of the question; the request
        // passed to the resolver stays exactly as received.
        let question = request.question().cloned();
        if let Err(e) = self.logger.log(src, question.as_ref()) {
            error!("failed to write request log line for {}: {}", src, e);
        }

        let response = self.resolver.resolve(&request).map_err(HandleError::Resolve)?;
        response.pack().map_err(HandleError::Serialize)
    }
}

/// Indicates to the caller of [`Server::handle_message`] what kind of
/// response needs to be sent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    /// A single response is to be sent. The serialized response is
    /// included.
    Single(Vec<u8>),

    /// No response is to be sent.
    None,
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// The ways handling of a single message can fail.
#[derive(Debug)]
enum HandleError {
    Parse(reader::Error),
    Resolve(resolver::Error),
    Serialize(writer::Error),
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "malformed message: {}", e),
            Self::Resolve(e) => write!(f, "resolver failed: {}", e),
            Self::Serialize(e) => write!(f, "failed to serialize response: {}", e),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::logger::Suffix;
    use crate::message::{Rcode, Record};
    use crate::name::Name;
    use crate::resolver::NxdomainResolver;
    use crate::rr::Type;

    /// A query for 68656c6c6f.c2.test. IN A, ID 0x1234, RD set.
    const HEX_QUERY: &[u8] = b"\x12\x34\x01\x00\x00\x01\x00\x00\x00\x00\x00\x00\
                               \x0a68656c6c6f\x02c2\x04test\x00\x00\x01\x00\x01";

    /// A resolver that records every request it sees.
    #[derive(Default)]
    struct RecordingResolver {
        seen: Mutex<Vec<Message>>,
    }

    impl Resolver for RecordingResolver {
        fn resolve(&self, request: &Message) -> Result<Message, resolver::Error> {
            self.seen.lock().unwrap().push(request.clone());
            NxdomainResolver.resolve(request)
        }
    }

    /// A resolver that always fails.
    struct FailingResolver;

    impl Resolver for FailingResolver {
        fn resolve(&self, _: &Message) -> Result<Message, resolver::Error> {
            Err(resolver::Error::Timeout)
        }
    }

    /// A resolver whose answers cannot be serialized.
    struct OversizedResolver;

    impl Resolver for OversizedResolver {
        fn resolve(&self, request: &Message) -> Result<Message, resolver::Error> {
            let mut response = request.reply();
            response.answers.push(Record {
                owner: Name::root(),
                rr_type: Type::TXT,
                class: crate::class::Class::IN,
                ttl: 0,
                rdata: vec![0; 70000],
            });
            Ok(response)
        }
    }

    fn server_with<R: Resolver>(resolver: R) -> (Server<R>, Arc<Mutex<Vec<u8>>>) {
        let sink = Arc::new(Mutex::new(Vec::<u8>::new()));
        let logger = RequestLogger::new(Suffix::new("c2.test"), true, Box::new(sink.clone()));
        (Server::new(resolver, logger), sink)
    }

    fn lines(sink: &Mutex<Vec<u8>>) -> Vec<String> {
        let buf = sink.lock().unwrap();
        String::from_utf8(buf.clone())
            .unwrap()
            .lines()
            .map(ToOwned::to_owned)
            .collect()
    }

    fn src() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    #[test]
    fn handle_message_logs_and_replies() {
        let (server, sink) = server_with(NxdomainResolver);
        let response = match server.handle_message(HEX_QUERY, src()) {
            Response::Single(octets) => Message::parse(&octets).unwrap(),
            Response::None => panic!("expected a response"),
        };
        assert_eq!(response.header.id, 0x1234);
        assert!(response.header.qr);
        assert!(response.header.aa);
        assert!(response.header.ra);
        assert_eq!(response.header.rcode, Rcode::NxDomain);
        assert_eq!(
            response.question().unwrap().qname,
            "68656c6c6f.c2.test.".parse::<Name>().unwrap()
        );
        assert_eq!(lines(&sink), ["192.0.2.10:40000: hello.c2.test. IN A"]);
    }

    #[test]
    fn handle_message_passes_unmodified_request_to_resolver() {
        let (server, _) = server_with(RecordingResolver::default());
        server.handle_message(HEX_QUERY, src());
        let seen = server.resolver().seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Message::parse(HEX_QUERY).unwrap());
        assert_eq!(seen[0].questions[0].qname.to_string(), "68656c6c6f.c2.test.");
    }

    #[test]
    fn handle_message_drops_malformed_messages() {
        let (server, sink) = server_with(NxdomainResolver);
        let garbage: [&[u8]; 4] = [
            b"",
            b"\x00\x01\x02",
            &HEX_QUERY[..20],
            b"not a dns message at all",
        ];
        for garbage in garbage {
            assert_eq!(server.handle_message(garbage, src()), Response::None);
        }
        assert!(lines(&sink).is_empty());

        // The server is unaffected.
        assert!(matches!(server.handle_message(HEX_QUERY, src()), Response::Single(_)));
    }

    #[test]
    fn handle_message_survives_resolver_failure() {
        let (server, sink) = server_with(FailingResolver);
        assert_eq!(server.handle_message(HEX_QUERY, src()), Response::None);
        assert_eq!(lines(&sink).len(), 1);
    }

    #[test]
    fn handle_message_survives_serialization_failure() {
        let (server, sink) = server_with(OversizedResolver);
        assert_eq!(server.handle_message(HEX_QUERY, src()), Response::None);
        assert_eq!(lines(&sink).len(), 1);
    }

    #[test]
    fn handle_message_answers_questionless_messages() {
        let (server, sink) = server_with(NxdomainResolver);
        let query = b"\x00\x07\x01\x00\x00\x00\x00\x00\x00\x00\x00\x00";
        let response = match server.handle_message(query, src()) {
            Response::Single(octets) => Message::parse(&octets).unwrap(),
            Response::None => panic!("expected a response"),
        };
        assert_eq!(response.header.id, 7);
        assert!(response.questions.is_empty());
        assert_eq!(lines(&sink), ["192.0.2.10:40000: (no question)"]);
    }
}
