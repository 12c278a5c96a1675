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

//! Implementation of the [`Label`] type.

use std::fmt;

/// A borrowed view of a single label of a [`Name`](super::Name),
/// without its length octet.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Label<'a> {
    octets: &'a [u8],
}

impl<'a> Label<'a> {
    pub(super) fn new(octets: &'a [u8]) -> Self {
        Self { octets }
    }

    /// Returns whether this is the null (zero-length) label.
    pub fn is_null(&self) -> bool {
        self.octets.is_empty()
    }

    /// Returns the length of the label in octets.
    pub fn len(&self) -> usize {
        self.octets.len()
    }

    /// Returns the octets of the label.
    pub fn octets(&self) -> &'a [u8] {
        self.octets
    }
}

/// When a `Label` is displayed, periods, backslashes, and octets that
/// are not ASCII graphic characters are escaped in accordance with
/// RFC 1035 § 5.1 and RFC 4343 § 2.1.
/// * Periods are escaped `\.`;
/// * backslashes are escaped `\\`;
/// * all other ASCII graphic characters are not escaped; and
/// * all other octets are escaped `\xyz`, where `xyz` is the
///   three-digit zero-padded decimal representation of the octet.
impl fmt::Display for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for &octet in self.octets {
            match octet {
                b'.' => f.write_str("\\.")?,
                b'\\' => f.write_str("\\\\")?,
                _ if octet.is_ascii_graphic() => write!(f, "{}", octet as char)?,
                _ => write!(f, "\\{:03}", octet)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Label<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    #[test]
    fn display_escapes_per_rfc1035() {
        let label = Label::new(b"a.b\\c d\x7f");
        assert_eq!(label.to_string(), "a\\.b\\\\c\\032d\\127");
    }

    #[test]
    fn labels_expose_their_octets() {
        let name: Name = "abc.test.".parse().unwrap();
        let labels: Vec<Label> = name.labels().collect();
        assert_eq!(labels[0].octets(), b"abc");
        assert_eq!(labels[0].len(), 3);
        assert_eq!(labels[1].octets(), b"test");
        assert_eq!(labels[2].len(), 0);
        assert!(labels[2].is_null());
    }
}
