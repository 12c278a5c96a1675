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

//! Text-level helpers for decoding question names: suffix
//! normalization, hex label decoding, and suffix stripping.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use crate::util::decode_hex;

////////////////////////////////////////////////////////////////////////
// SUFFIXES                                                           //
////////////////////////////////////////////////////////////////////////

/// A name suffix in canonical form.
///
/// A non-empty suffix always begins and ends with a single `.`, as in
/// `.c2.test.`. The empty suffix means that no suffix is configured.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Suffix(String);

impl Suffix {
    /// Normalizes `raw` into a `Suffix` by adding a leading and a
    /// trailing `.` where they are missing. Empty input gives the empty
    /// suffix. Normalizing an already normalized suffix leaves it
    /// unchanged.
    pub fn new(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        let mut suffix = String::with_capacity(raw.len() + 2);
        if !raw.starts_with('.') {
            suffix.push('.');
        }
        suffix.push_str(raw);
        if !raw.ends_with('.') {
            suffix.push('.');
        }
        Self(suffix)
    }

    /// Returns whether no suffix is configured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the canonical text of the suffix.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Suffix {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl FromStr for Suffix {
    type Err = Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(raw))
    }
}

impl AsRef<str> for Suffix {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

////////////////////////////////////////////////////////////////////////
// LABEL DECODING                                                     //
////////////////////////////////////////////////////////////////////////

/// Decodes `label` as pairs of hexadecimal digits encoding UTF-8 text.
///
/// If the label has an odd length, contains anything other than
/// hexadecimal digits, or does not decode to valid UTF-8, it is
/// returned unchanged (and borrowed). The empty label decodes to
/// itself.
pub fn decode_label(label: &str) -> Cow<str> {
    match decode_hex(label).map(String::from_utf8) {
        Some(Ok(text)) => Cow::Owned(text),
        _ => Cow::Borrowed(label),
    }
}

/// Removes `suffix` from the end of `name` if the suffix is non-empty
/// and `name` ends with it. The comparison is textual and
/// case-sensitive.
pub fn strip_suffix<'a>(name: &'a str, suffix: &Suffix) -> &'a str {
    if suffix.is_empty() {
        name
    } else {
        name.strip_suffix(suffix.as_str()).unwrap_or(name)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_normalization_works() {
        assert_eq!(Suffix::new("").as_str(), "");
        assert_eq!(Suffix::new("example.com").as_str(), ".example.com.");
        assert_eq!(Suffix::new(".example.com").as_str(), ".example.com.");
        assert_eq!(Suffix::new("example.com.").as_str(), ".example.com.");
        assert_eq!(Suffix::new(".example.com.").as_str(), ".example.com.");
        assert_eq!(Suffix::new(".").as_str(), ".");
        assert!(Suffix::new("").is_empty());
    }

    #[test]
    fn suffix_normalization_is_idempotent() {
        for raw in ["", ".", "a", "c2.test", ".c2.test", "c2.test.", "..x.."] {
            let once = Suffix::new(raw);
            let twice = Suffix::new(once.as_str());
            assert_eq!(once, twice, "normalizing {:?} twice changed it", raw);
        }
    }

    #[test]
    fn decode_label_decodes_hex_text() {
        for text in ["hello", "", "whoami; id", "caf\u{e9}", "\u{1f980}"] {
            let hex: String = text.bytes().map(|b| format!("{:02x}", b)).collect();
            assert_eq!(decode_label(&hex), text);
        }
        assert_eq!(decode_label("48454C4C4F"), "HELLO");
        assert!(matches!(decode_label("68656c6c6f"), Cow::Owned(_)));
    }

    #[test]
    fn decode_label_passes_through_undecodable_labels() {
        // Odd length.
        assert!(matches!(decode_label("abc"), Cow::Borrowed("abc")));
        // Not hexadecimal.
        assert!(matches!(decode_label("www"), Cow::Borrowed("www")));
        assert!(matches!(decode_label("0x41"), Cow::Borrowed("0x41")));
        // Valid hex, but not valid UTF-8.
        assert!(matches!(decode_label("ff00"), Cow::Borrowed("ff00")));
        assert!(matches!(decode_label("c3"), Cow::Borrowed("c3")));
    }

    #[test]
    fn strip_suffix_works() {
        let suffix = Suffix::new("example.com");
        assert_eq!(strip_suffix("foo.example.com.", &suffix), "foo");
        assert_eq!(strip_suffix("a.b.example.com.", &suffix), "a.b");
        assert_eq!(strip_suffix(".example.com.", &suffix), "");
        assert_eq!(strip_suffix("foo.bar.", &Suffix::new(".baz.")), "foo.bar.");
        assert_eq!(strip_suffix("foo.EXAMPLE.com.", &suffix), "foo.EXAMPLE.com.");
        assert_eq!(strip_suffix("foo.example.com.", &Suffix::new("")), "foo.example.com.");
    }
}
