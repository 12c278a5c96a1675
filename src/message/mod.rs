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

//! Implementation of reading and writing of DNS messages.
//!
//! [`Reader`] and [`Writer`] operate directly on the wire format. The
//! [`Message`] type sits on top of them and holds a fully parsed
//! message that can be inspected, copied, and serialized again.

mod constants;
mod header;
mod opcode;
mod question;
mod rcode;
pub mod reader;
pub mod writer;
pub use header::Header;
pub use opcode::Opcode;
pub use question::{Qclass, Qtype, Question};
pub use rcode::Rcode;
pub use reader::Reader;
pub use writer::Writer;

use crate::class::Class;
use crate::name::Name;
use crate::rr::Type;

////////////////////////////////////////////////////////////////////////
// MESSAGES                                                           //
////////////////////////////////////////////////////////////////////////

/// A parsed DNS message.
///
/// Records in all three record sections are kept as opaque RDATA,
/// except that names embedded in the RDATA of the RFC 1035 types are
/// decompressed when reading. This means a `Message` can always be
/// serialized with [`Message::pack`] without reference to the buffer
/// it was parsed from.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

/// A resource record held by a [`Message`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub owner: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl Message {
    /// Parses `octets` as a DNS message.
    ///
    /// Every question and record announced by the header counts must be
    /// present and well formed. Octets following the last record are
    /// ignored.
    pub fn parse(octets: &[u8]) -> reader::Result<Self> {
        let mut reader = Reader::try_from(octets)?;
        let mut message = Self {
            header: reader.header(),
            ..Default::default()
        };
        for _ in 0..reader.qdcount() {
            message.questions.push(reader.read_question()?);
        }
        for (count, section) in [
            (reader.ancount(), &mut message.answers),
            (reader.nscount(), &mut message.authorities),
            (reader.arcount(), &mut message.additionals),
        ] {
            for _ in 0..count {
                let rr = reader.read_rr()?;
                section.push(Record {
                    owner: rr.owner,
                    rr_type: rr.rr_type,
                    class: rr.class,
                    ttl: rr.ttl,
                    rdata: rr.rdata.into_owned(),
                });
            }
        }
        Ok(message)
    }

    /// Serializes the message into its wire format. Names are written
    /// uncompressed, and the header counts are taken from the sections.
    pub fn pack(&self) -> writer::Result<Vec<u8>> {
        let mut writer = Writer::new();
        writer.set_header(&self.header);
        for question in &self.questions {
            writer.add_question(question)?;
        }
        for record in &self.answers {
            writer.add_answer_rr(record)?;
        }
        for record in &self.authorities {
            writer.add_authority_rr(record)?;
        }
        for record in &self.additionals {
            writer.add_additional_rr(record)?;
        }
        Ok(writer.finish())
    }

    /// Creates an empty response to this message.
    ///
    /// The response carries the same ID, opcode, RD bit and questions.
    /// QR, AA and RA are set; everything else (including the RCODE) is
    /// left at its default for the caller to fill in.
    pub fn reply(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                qr: true,
                opcode: self.header.opcode,
                aa: true,
                rd: self.header.rd,
                ra: true,
                ..Default::default()
            },
            questions: self.questions.clone(),
            ..Default::default()
        }
    }

    /// Returns the first question of the message, if there is one.
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
