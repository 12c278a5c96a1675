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

//! Implementation of data structures related to domain names.

use std::fmt;
use std::str::FromStr;

use arrayvec::ArrayVec;

mod error;
mod label;
mod wire;
pub use error::Error;
pub use label::Label;

/// The maximum number of labels in a domain name.
const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A structure to represent a fully qualified domain name.
///
/// `Name`s can be constructed through the [`FromStr`] implementation
/// or from (possibly compressed) on-the-wire names through
/// [`Name::try_from_compressed`].
///
/// Internally, a `Name` stores the uncompressed on-the-wire
/// representation defined in [RFC 1035 § 3.1] alongside the offset of
/// each label within it. Both live in fixed-capacity inline buffers,
/// so a `Name` never allocates and cloning one is a plain copy.
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    label_offsets: ArrayVec<u8, MAX_N_LABELS>,
    wire_repr: ArrayVec<u8, MAX_WIRE_LEN>,
}

impl Name {
    /// Returns the root name.
    pub fn root() -> Self {
        let mut label_offsets = ArrayVec::new();
        label_offsets.push(0);
        let mut wire_repr = ArrayVec::new();
        wire_repr.push(0);
        Self {
            label_offsets,
            wire_repr,
        }
    }

    /// Returns whether this is the root name.
    pub fn is_root(&self) -> bool {
        self.len() == 1
    }

    /// Returns the number of labels in the name, including the
    /// terminal null label.
    pub fn len(&self) -> usize {
        self.label_offsets.len()
    }

    /// Returns an iterator over the labels of the name, including the
    /// terminal null label.
    pub fn labels(&self) -> impl DoubleEndedIterator<Item = Label<'_>> + '_ {
        self.label_offsets.iter().map(move |&offset| {
            let start = offset as usize + 1;
            let end = start + self.wire_repr[offset as usize] as usize;
            Label::new(&self.wire_repr[start..end])
        })
    }

    /// Parses a compressed on-the-wire name starting at index `start`
    /// of `octets`, which should be an entire DNS message. On success,
    /// the name and the number of octets it occupies at `start` are
    /// returned.
    pub fn try_from_compressed(octets: &[u8], start: usize) -> Result<(Self, usize), Error> {
        wire::parse_compressed_name(octets, start)
    }

    /// Returns the uncompressed on-the-wire representation of the name.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire_repr
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels().filter(|label| !label.is_null()) {
            write!(f, "{}.", label)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

/// Names compare ASCII-case-insensitively, per RFC 4343. Length octets
/// are never greater than 63, so they are unaffected by ASCII case
/// folding and the wire representations can be compared directly.
impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.wire_repr.eq_ignore_ascii_case(&other.wire_repr)
    }
}

impl Eq for Name {}

////////////////////////////////////////////////////////////////////////
// PARSING NAMES FROM TEXT                                            //
////////////////////////////////////////////////////////////////////////

/// Names are parsed from their RFC 1035 § 5.1 textual representation.
/// Relative names are taken to be relative to the root.
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::StrEmpty);
        } else if s == "." {
            return Ok(Self::root());
        }

        let mut builder = Builder::default();
        let mut remaining_octets = s.as_bytes();

        // NOTE: to check that the string is ASCII, it suffices to check
        // that each octet is ASCII as we go. This is because all
        // multi-byte characters start with an octet that is not ASCII.
        while let Some(&octet) = remaining_octets.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining_octets[1..])?;
                builder.push(value)?;
                remaining_octets = &remaining_octets[consumed + 1..];
            } else if octet == b'.' {
                builder.next_label()?;
                remaining_octets = &remaining_octets[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                builder.push(octet)?;
                remaining_octets = &remaining_octets[1..];
            }
        }
        builder.finish()
    }
}

/// Accumulates the labels of a name being parsed from text.
#[derive(Default)]
struct Builder {
    label_offsets: ArrayVec<u8, MAX_N_LABELS>,
    wire_repr: ArrayVec<u8, MAX_WIRE_LEN>,
    current: ArrayVec<u8, MAX_LABEL_LEN>,
}

impl Builder {
    fn push(&mut self, octet: u8) -> Result<(), Error> {
        self.current.try_push(octet).or(Err(Error::LabelTooLong))
    }

    fn next_label(&mut self) -> Result<(), Error> {
        if self.current.is_empty() {
            return Err(Error::NullNonTerminal);
        }
        self.label_offsets
            .try_push(self.wire_repr.len() as u8)
            .or(Err(Error::NameTooLong))?;
        self.wire_repr
            .try_push(self.current.len() as u8)
            .or(Err(Error::NameTooLong))?;
        self.wire_repr
            .try_extend_from_slice(&self.current)
            .or(Err(Error::NameTooLong))?;
        self.current.clear();
        Ok(())
    }

    fn finish(mut self) -> Result<Name, Error> {
        if !self.current.is_empty() {
            self.next_label()?;
        }
        self.label_offsets
            .try_push(self.wire_repr.len() as u8)
            .or(Err(Error::NameTooLong))?;
        self.wire_repr.try_push(0).or(Err(Error::NameTooLong))?;
        Ok(Name {
            label_offsets: self.label_offsets,
            wire_repr: self.wire_repr,
        })
    }
}

/// Parses an escape sequence. We expect `remaining_octets` to start
/// with the octet immediately *after* the backslash that introduces the
/// escape sequence.
fn parse_escape(remaining_octets: &[u8]) -> Result<(u8, usize), Error> {
    match remaining_octets {
        [] => Err(Error::InvalidEscape),
        [a, b, c, ..] if a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit() => {
            let value = 100 * (a - b'0') as usize + 10 * (b - b'0') as usize + (c - b'0') as usize;
            u8::try_from(value)
                .map(|value| (value, 3))
                .or(Err(Error::InvalidEscape))
        }
        [first, ..] if first.is_ascii_digit() => Err(Error::InvalidEscape),
        [first, ..] => Ok((*first, 1)),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
