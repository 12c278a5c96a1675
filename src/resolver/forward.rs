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

//! Implementation of the [`ForwardingResolver`].

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::debug;

use super::{Error, Resolver};
use crate::io::MAX_DATAGRAM_SIZE;
use crate::message::Message;
use crate::util::{compute_timeout, retry_if_interrupted};

/// The default time to wait for an upstream response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`Resolver`] that forwards requests to an upstream server over
/// UDP.
///
/// Each request is sent from a fresh ephemeral socket with a new random
/// ID. Datagrams that do not come from the upstream address, do not
/// parse, or carry the wrong ID or question are ignored until the
/// timeout expires.
/// The response handed back carries the client's original ID.
#[derive(Clone, Debug)]
pub struct ForwardingResolver {
    upstream: SocketAddr,
    timeout: Duration,
}

impl ForwardingResolver {
    /// Creates a new `ForwardingResolver` for `upstream` that waits up
    /// to `timeout` for each response.
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    fn bind_ephemeral(&self) -> io::Result<UdpSocket> {
        let local: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        UdpSocket::bind(local)
    }
}

impl Resolver for ForwardingResolver {
    fn resolve(&self, request: &Message) -> Result<Message, Error> {
        let id = rand::random::<u16>();
        let mut query = request.clone();
        query.header.id = id;
        let octets = query.pack()?;

        let socket = self.bind_ephemeral()?;
        retry_if_interrupted(|| socket.send_to(&octets, self.upstream))?;
        debug!("forwarded request {:#06x} to {} as {:#06x}", request.header.id, self.upstream, id);

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0; MAX_DATAGRAM_SIZE];
        loop {
            let timeout = compute_timeout(deadline)
                .filter(|t| !t.is_zero())
                .ok_or(Error::Timeout)?;
            socket.set_read_timeout(Some(timeout))?;
            let (len, src) = match socket.recv_from(&mut buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(Error::Timeout),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(Error::Timeout),
                Err(e) => return Err(e.into()),
            };

            if src != self.upstream {
                debug!("ignoring datagram from {} while waiting on {}", src, self.upstream);
                continue;
            }
            match Message::parse(&buf[..len]) {
                Ok(mut response)
                    if response.header.qr
                        && response.header.id == id
                        && response.questions == query.questions =>
                {
                    response.header.id = request.header.id;
                    return Ok(response);
                }
                Ok(response) => {
                    debug!(
                        "ignoring unmatched upstream message with ID {:#06x}",
                        response.header.id
                    );
                }
                Err(e) => debug!("ignoring malformed upstream response: {}", e),
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::class::Class;
    use crate::message::{Header, Question, Rcode, Record};
    use crate::rr::Type;

    fn request() -> Message {
        Message {
            header: Header {
                id: 0x4242,
                rd: true,
                ..Default::default()
            },
            questions: vec![Question {
                qname: "example.test.".parse().unwrap(),
                qtype: Type::A.into(),
                qclass: Class::IN.into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn forwarding_resolver_relays_matching_response() {
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let server = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, client) = upstream.recv_from(&mut buf).unwrap();
            let query = Message::parse(&buf[..len]).unwrap();

            // First a reply with the wrong ID, which must be skipped.
            let mut wrong = query.reply();
            wrong.header.id = query.header.id.wrapping_add(1);
            upstream.send_to(&wrong.pack().unwrap(), client).unwrap();

            let mut right = query.reply();
            right.answers.push(Record {
                owner: query.questions[0].qname.clone(),
                rr_type: Type::A,
                class: Class::IN,
                ttl: 60,
                rdata: vec![192, 0, 2, 7],
            });
            upstream.send_to(&right.pack().unwrap(), client).unwrap();
            query
        });

        let resolver = ForwardingResolver::new(upstream_addr, Duration::from_secs(5));
        let request = request();
        let response = resolver.resolve(&request).unwrap();
        let forwarded = server.join().unwrap();

        assert_eq!(forwarded.questions, request.questions);
        assert_eq!(response.header.id, 0x4242);
        assert_eq!(response.header.rcode, Rcode::NoError);
        assert_eq!(response.answers.len(), 1);
        assert_eq!(response.answers[0].rdata, [192, 0, 2, 7]);
        assert_eq!(request.header.id, 0x4242);
    }

    #[test]
    fn forwarding_resolver_skips_response_to_other_question() {
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let server = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, client) = upstream.recv_from(&mut buf).unwrap();
            let query = Message::parse(&buf[..len]).unwrap();

            let mut other = query.reply();
            other.questions[0].qname = "elsewhere.test.".parse().unwrap();
            other.header.rcode = Rcode::Refused;
            upstream.send_to(&other.pack().unwrap(), client).unwrap();

            let mut right = query.reply();
            right.header.rcode = Rcode::NxDomain;
            upstream.send_to(&right.pack().unwrap(), client).unwrap();
        });

        let resolver = ForwardingResolver::new(upstream_addr, Duration::from_secs(5));
        let request = request();
        let response = resolver.resolve(&request).unwrap();
        server.join().unwrap();

        assert_eq!(response.header.rcode, Rcode::NxDomain);
        assert_eq!(response.questions, request.questions);
    }

    #[test]
    fn forwarding_resolver_accepts_large_responses() {
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let server = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, client) = upstream.recv_from(&mut buf).unwrap();
            let query = Message::parse(&buf[..len]).unwrap();

            let mut big = query.reply();
            for _ in 0..20 {
                let mut rdata = vec![255];
                rdata.extend_from_slice(&[b'a'; 255]);
                big.answers.push(Record {
                    owner: query.questions[0].qname.clone(),
                    rr_type: Type::TXT,
                    class: Class::IN,
                    ttl: 60,
                    rdata,
                });
            }
            let octets = big.pack().unwrap();
            upstream.send_to(&octets, client).unwrap();
            octets.len()
        });

        let resolver = ForwardingResolver::new(upstream_addr, Duration::from_secs(5));
        let response = resolver.resolve(&request()).unwrap();
        let sent = server.join().unwrap();

        assert!(sent > 4096);
        assert_eq!(response.answers.len(), 20);
        assert!(response.answers.iter().all(|rr| rr.rdata.len() == 256));
    }

    #[test]
    fn forwarding_resolver_times_out() {
        // Bound but silent.
        let upstream = UdpSocket::bind("127.0.0.1:0").unwrap();
        let resolver =
            ForwardingResolver::new(upstream.local_addr().unwrap(), Duration::from_millis(100));
        assert!(matches!(resolver.resolve(&request()), Err(Error::Timeout)));
    }
}
