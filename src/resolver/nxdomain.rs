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

//! Implementation of the [`NxdomainResolver`].

use super::{Error, Resolver};
use crate::message::{Message, Rcode};

/// A [`Resolver`] that answers every request with an empty NXDOMAIN
/// response. The response echoes the request's ID and questions and
/// has the AA and RA bits set.
#[derive(Clone, Copy, Debug, Default)]
pub struct NxdomainResolver;

impl Resolver for NxdomainResolver {
    fn resolve(&self, request: &Message) -> Result<Message, Error> {
        let mut response = request.reply();
        response.header.rcode = Rcode::NxDomain;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::message::{Header, Opcode, Question};
    use crate::rr::Type;

    #[test]
    fn nxdomain_resolver_works() {
        let request = Message {
            header: Header {
                id: 0xbeef,
                opcode: Opcode::Query,
                rd: true,
                ..Default::default()
            },
            questions: vec![Question {
                qname: "68656c6c6f.c2.test.".parse().unwrap(),
                qtype: Type::A.into(),
                qclass: Class::IN.into(),
            }],
            ..Default::default()
        };
        let response = NxdomainResolver.resolve(&request).unwrap();
        assert_eq!(response.header.id, 0xbeef);
        assert!(response.header.qr);
        assert!(response.header.aa);
        assert!(response.header.ra);
        assert!(response.header.rd);
        assert_eq!(response.header.rcode, Rcode::NxDomain);
        assert_eq!(response.questions, request.questions);
        assert!(response.answers.is_empty());
        assert!(response.authorities.is_empty());
        assert!(response.additionals.is_empty());
    }
}
