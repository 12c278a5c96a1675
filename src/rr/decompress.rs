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

//! Reading of RDATA from received messages.
//!
//! Per [RFC 3597 § 4], RDATA of the RR types defined in [RFC 1035] may
//! contain compressed domain names. Compression pointers are only
//! meaningful within the message they were read from, so before such
//! RDATA can be written into another message, any embedded names must
//! be decompressed. RDATA of all other types is carried through as-is.
//!
//! [RFC 1035]: https://datatracker.ietf.org/doc/html/rfc1035
//! [RFC 3597 § 4]: https://datatracker.ietf.org/doc/html/rfc3597#section-4

use std::borrow::Cow;
use std::fmt;

use super::Type;
use crate::name::{self, Name};

/// A field of RDATA, classified for decompression.
#[derive(Clone, Copy)]
enum Field {
    Name,
    Fixed(usize),
}

/// Reads RDATA of type `rr_type` and length `rdlength` starting at
/// `&message[cursor]`. For the RFC 1035 types that may embed
/// compressed names, a new buffer holding the uncompressed RDATA is
/// allocated; otherwise the RDATA is borrowed from `message`.
///
/// If the remaining part of the message is not `rdlength` long, this
/// fails with [`ReadRdataError::UnexpectedEom`] rather than panicking.
pub fn read_rdata(
    rr_type: Type,
    message: &[u8],
    cursor: usize,
    rdlength: u16,
) -> Result<Cow<[u8]>, ReadRdataError> {
    let end = cursor + rdlength as usize;
    if end > message.len() {
        return Err(ReadRdataError::UnexpectedEom);
    }

    // Pointers may refer to anything earlier in the message, but the
    // embedded names themselves must end within the RDATA.
    let bounded = &message[..end];
    match rr_type {
        Type::NS
        | Type::MD
        | Type::MF
        | Type::CNAME
        | Type::MB
        | Type::MG
        | Type::MR
        | Type::PTR => decompress(bounded, cursor, &[Field::Name]),
        Type::SOA => decompress(bounded, cursor, &[Field::Name, Field::Name, Field::Fixed(20)]),
        Type::MINFO => decompress(bounded, cursor, &[Field::Name, Field::Name]),
        Type::MX => decompress(bounded, cursor, &[Field::Fixed(2), Field::Name]),
        _ => Ok(Cow::Borrowed(&message[cursor..end])),
    }
}

/// Decompresses RDATA laid out as `fields`, which must exactly fill the
/// RDATA running from `cursor` to the end of `message`.
fn decompress<'a>(
    message: &[u8],
    cursor: usize,
    fields: &[Field],
) -> Result<Cow<'a, [u8]>, ReadRdataError> {
    let mut rdata = Vec::new();
    let mut index = cursor;
    for field in fields {
        match *field {
            Field::Name => {
                let (name, len) = Name::try_from_compressed(message, index)?;
                rdata.extend_from_slice(name.wire_repr());
                index += len;
            }
            Field::Fixed(len) => {
                let octets = message
                    .get(index..index + len)
                    .ok_or(ReadRdataError::UnexpectedEom)?;
                rdata.extend_from_slice(octets);
                index += len;
            }
        }
    }

    if index == message.len() {
        Ok(Cow::Owned(rdata))
    } else {
        Err(ReadRdataError::LengthMismatch)
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that RDATA could not be read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ReadRdataError {
    UnexpectedEom,
    InvalidName(name::Error),
    LengthMismatch,
}

impl From<name::Error> for ReadRdataError {
    fn from(err: name::Error) -> Self {
        Self::InvalidName(err)
    }
}

impl fmt::Display for ReadRdataError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::UnexpectedEom => f.write_str("unexpected end of message in RDATA"),
            Self::InvalidName(err) => write!(f, "invalid name in RDATA: {}", err),
            Self::LengthMismatch => f.write_str("RDATA fields do not match RDLENGTH"),
        }
    }
}

impl std::error::Error for ReadRdataError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompresses_mx_rdata() {
        // "test." at offset 0, then MX RDATA: preference 10 and
        // "mail" + pointer to offset 0.
        let message = b"\x04test\x00\x00\x0a\x04mail\xc0\x00";
        let rdata = read_rdata(Type::MX, message, 6, 9).unwrap();
        assert_eq!(rdata.as_ref(), b"\x00\x0a\x04mail\x04test\x00");
        assert!(matches!(rdata, Cow::Owned(_)));
    }

    #[test]
    fn borrows_rdata_of_other_types() {
        let message = b"\x7f\x00\x00\x01";
        let rdata = read_rdata(Type::A, message, 0, 4).unwrap();
        assert!(matches!(rdata, Cow::Borrowed(b"\x7f\x00\x00\x01")));
    }

    #[test]
    fn rejects_short_messages() {
        assert_eq!(
            read_rdata(Type::A, b"\x7f\x00", 0, 4).unwrap_err(),
            ReadRdataError::UnexpectedEom
        );
    }

    #[test]
    fn rejects_trailing_octets_in_name_rdata() {
        let message = b"\x04test\x00junk";
        assert_eq!(
            read_rdata(Type::CNAME, message, 0, 10).unwrap_err(),
            ReadRdataError::LengthMismatch
        );
    }
}
