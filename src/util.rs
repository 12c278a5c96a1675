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

//! Crate-private utilities.

use std::io;
use std::time::{Duration, Instant};

/// Converts an ASCII hexadecimal digit to its numeric value. This
/// returns [`None`] if `digit` is not one of the ASCII characters
/// `0` through `9`, `A` through `F`, or `a` through `f`.
pub fn ascii_hex_digit_to_nibble(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}

/// Decodes a string of hexadecimal digit pairs into octets. Returns
/// [`None`] if the string has odd length or contains anything other
/// than ASCII hex digits. The empty string decodes to no octets.
pub fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let digits = text.as_bytes();
    if digits.len() % 2 != 0 {
        return None;
    }
    digits
        .chunks_exact(2)
        .map(|pair| {
            let high = ascii_hex_digit_to_nibble(pair[0])?;
            let low = ascii_hex_digit_to_nibble(pair[1])?;
            Some(high << 4 | low)
        })
        .collect()
}

/// Computes the time until the deadline. Returns [`None`] if the
/// deadline is in the past.
pub fn compute_timeout(deadline: Instant) -> Option<Duration> {
    deadline.checked_duration_since(Instant::now())
}

/// Executes `f`, retrying the operation if it is interrupted.
pub fn retry_if_interrupted<F, R>(mut f: F) -> io::Result<R>
where
    F: FnMut() -> io::Result<R>,
{
    loop {
        match f() {
            Ok(r) => return Ok(r),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hex_accepts_both_cases() {
        assert_eq!(decode_hex("00ffA0"), Some(vec![0x00, 0xff, 0xa0]));
    }

    #[test]
    fn decode_hex_rejects_odd_length_and_non_digits() {
        assert_eq!(decode_hex("abc"), None);
        assert_eq!(decode_hex("zz"), None);
        assert_eq!(decode_hex("0x"), None);
    }

    #[test]
    fn decode_hex_of_empty_string_is_empty() {
        assert_eq!(decode_hex(""), Some(Vec::new()));
    }
}
