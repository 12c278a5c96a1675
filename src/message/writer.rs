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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::fmt;

use super::constants::*;
use super::{Header, Question, Record};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// Serializes a DNS message into a growable buffer.
///
/// A `Writer` starts out with a zeroed 12-octet header. Header fields
/// can be set at any time with [`Writer::set_header`]. Questions and
/// resource records are written sequentially after the header, so the
/// following methods must be used in order:
///
/// * [`Writer::add_question`];
/// * [`Writer::add_answer_rr`];
/// * [`Writer::add_authority_rr`]; and
/// * [`Writer::add_additional_rr`].
///
/// Attempts to use them out of order fail with [`Error::OutOfOrder`].
///
/// Names are always written uncompressed. When the message is complete,
/// [`Writer::finish`] fills in the section counts and returns the
/// serialized octets.
#[derive(Debug)]
pub struct Writer {
    octets: Vec<u8>,
    section: Section,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
}

/// A type for recording which section of a DNS message a [`Writer`] is
/// currently serializing.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl Writer {
    /// Creates a new `Writer` with a zeroed header.
    pub fn new() -> Self {
        Self {
            octets: vec![0; HEADER_SIZE],
            section: Section::Question,
            qdcount: 0,
            ancount: 0,
            nscount: 0,
            arcount: 0,
        }
    }

    /// Writes the flags and codes of `header` into the message header.
    pub fn set_header(&mut self, header: &Header) {
        self.octets[ID..ID + 2].copy_from_slice(&header.id.to_be_bytes());
        let opcode: u8 = header.opcode.into();
        let rcode: u8 = header.rcode.into();
        self.octets[FLAGS_HI] = flag(header.qr, QR)
            | ((opcode << OPCODE_SHIFT) & OPCODE)
            | flag(header.aa, AA)
            | flag(header.tc, TC)
            | flag(header.rd, RD);
        self.octets[FLAGS_LO] = flag(header.ra, RA)
            | flag(header.z, Z)
            | flag(header.ad, AD)
            | flag(header.cd, CD)
            | (rcode & RCODE);
    }

    /// Adds a question to the message. This must be used before any
    /// resource records are added.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        if self.section != Section::Question {
            return Err(Error::OutOfOrder);
        }
        self.qdcount = self.qdcount.checked_add(1).ok_or(Error::CountOverflow)?;
        self.octets.extend_from_slice(question.qname.wire_repr());
        self.push_u16(question.qtype.into());
        self.push_u16(question.qclass.into());
        Ok(())
    }

    /// Adds a resource record to the answer section of the message.
    pub fn add_answer_rr(&mut self, record: &Record) -> Result<()> {
        self.add_rr(Section::Answer, record)
    }

    /// Adds a resource record to the authority section of the message.
    pub fn add_authority_rr(&mut self, record: &Record) -> Result<()> {
        self.add_rr(Section::Authority, record)
    }

    /// Adds a resource record to the additional section of the message.
    pub fn add_additional_rr(&mut self, record: &Record) -> Result<()> {
        self.add_rr(Section::Additional, record)
    }

    /// Fills in the section counts and returns the finished message.
    pub fn finish(mut self) -> Vec<u8> {
        self.set_count(QDCOUNT, self.qdcount);
        self.set_count(ANCOUNT, self.ancount);
        self.set_count(NSCOUNT, self.nscount);
        self.set_count(ARCOUNT, self.arcount);
        self.octets
    }

    fn add_rr(&mut self, section: Section, record: &Record) -> Result<()> {
        if section < self.section {
            return Err(Error::OutOfOrder);
        }
        let rdlength = u16::try_from(record.rdata.len()).map_err(|_| Error::RdataTooLong)?;
        let count = match section {
            Section::Answer => &mut self.ancount,
            Section::Authority => &mut self.nscount,
            Section::Additional => &mut self.arcount,
            Section::Question => unreachable!(),
        };
        *count = count.checked_add(1).ok_or(Error::CountOverflow)?;
        self.section = section;

        self.octets.extend_from_slice(record.owner.wire_repr());
        self.push_u16(record.rr_type.into());
        self.push_u16(record.class.into());
        self.octets.extend_from_slice(&record.ttl.to_be_bytes());
        self.push_u16(rdlength);
        self.octets.extend_from_slice(&record.rdata);
        Ok(())
    }

    fn push_u16(&mut self, value: u16) {
        self.octets.extend_from_slice(&value.to_be_bytes());
    }

    fn set_count(&mut self, start: usize, count: u16) {
        self.octets[start..start + 2].copy_from_slice(&count.to_be_bytes());
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

fn flag(set: bool, mask: u8) -> u8 {
    if set {
        mask
    } else {
        0
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that a [`Writer`] operation could not be
/// performed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Adding the question or resource record would overflow the
    /// corresponding 16-bit counter in the DNS header.
    CountOverflow,

    /// An attempt was made to serialize a question or resource record
    /// in the wrong place in the message (e.g., adding a question after
    /// an answer resource record has already been serialized).
    OutOfOrder,

    /// The RDATA of a resource record is longer than 65,535 octets.
    RdataTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::CountOverflow => f.write_str("record count would overflow"),
            Self::OutOfOrder => f.write_str("question or record serialized out of order"),
            Self::RdataTooLong => f.write_str("RDATA too long"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{Opcode, Rcode};
    use super::*;
    use crate::class::Class;
    use crate::rr::Type;

    fn question() -> Question {
        Question {
            qname: "observer.test.".parse().unwrap(),
            qtype: Type::A.into(),
            qclass: Class::IN.into(),
        }
    }

    fn record() -> Record {
        Record {
            owner: "observer.test.".parse().unwrap(),
            rr_type: Type::A,
            class: Class::IN,
            ttl: 3600,
            rdata: b"\x7f\x00\x00\x01".to_vec(),
        }
    }

    #[test]
    fn writer_works() {
        let mut writer = Writer::new();
        writer.set_header(&Header {
            id: 0x0703,
            qr: true,
            opcode: Opcode::Query,
            aa: true,
            rcode: Rcode::NxDomain,
            ..Default::default()
        });
        writer.add_question(&question()).unwrap();
        writer.add_answer_rr(&record()).unwrap();
        assert_eq!(
            writer.finish(),
            b"\x07\x03\x84\x03\x00\x01\x00\x01\x00\x00\x00\x00\
              \x08observer\x04test\x00\x00\x01\x00\x01\
              \x08observer\x04test\x00\x00\x01\x00\x01\x00\x00\x0e\x10\x00\x04\
              \x7f\x00\x00\x01"
        );
    }

    #[test]
    fn writer_encodes_every_header_flag() {
        let mut writer = Writer::new();
        writer.set_header(&Header {
            id: 0xffff,
            qr: true,
            opcode: Opcode::Update,
            aa: true,
            tc: true,
            rd: true,
            ra: true,
            z: true,
            ad: true,
            cd: true,
            rcode: Rcode::Refused,
        });
        assert_eq!(writer.finish(), b"\xff\xff\xaf\xf5\x00\x00\x00\x00\x00\x00\x00\x00");
    }

    #[test]
    fn writer_enforces_section_order() {
        let mut writer = Writer::new();
        writer.add_additional_rr(&record()).unwrap();
        assert_eq!(writer.add_question(&question()), Err(Error::OutOfOrder));
        assert_eq!(writer.add_answer_rr(&record()), Err(Error::OutOfOrder));
        assert_eq!(writer.add_authority_rr(&record()), Err(Error::OutOfOrder));
        writer.add_additional_rr(&record()).unwrap();
        let octets = writer.finish();
        assert_eq!(&octets[ARCOUNT..ARCOUNT + 2], b"\x00\x02");
    }

    #[test]
    fn writer_rejects_oversized_rdata() {
        let mut writer = Writer::new();
        let mut record = record();
        record.rdata = vec![0; 65536];
        assert_eq!(writer.add_answer_rr(&record), Err(Error::RdataTooLong));
    }
}
