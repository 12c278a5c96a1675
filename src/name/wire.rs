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

//! Implementation of parsing of on-the-wire names.

use arrayvec::ArrayVec;

use super::{Error, Name, MAX_LABEL_LEN, MAX_N_LABELS, MAX_WIRE_LEN};

/// Parses a compressed name starting at index `start` of `octets`.
/// Pointers are followed. Indices given in pointers are treated as
/// indices of `octets`, so the intention is for an entire DNS message
/// to be passed in `octets`. This is the implementation of
/// [`Name::try_from_compressed`].
pub fn parse_compressed_name(octets: &[u8], start: usize) -> Result<(Name, usize), Error> {
    let mut next_chunk = Some(start);
    let mut wire_len_of_first_chunk = None;

    let mut label_offsets = ArrayVec::<u8, MAX_N_LABELS>::new();
    let mut wire_repr = ArrayVec::<u8, MAX_WIRE_LEN>::new();

    while let Some(chunk_start) = next_chunk {
        let mut finished_with_chunk = false;
        let mut index = chunk_start;

        while !finished_with_chunk {
            let len = *octets.get(index).ok_or(Error::UnexpectedEom)?;
            if len & 0xc0 == 0xc0 {
                next_chunk = Some(parse_pointer(octets, chunk_start, index)? as usize);
                index += 2;
                finished_with_chunk = true;
            } else if len > (MAX_LABEL_LEN as u8) {
                return Err(Error::LabelTooLong);
            } else {
                let end_of_label = index + len as usize + 1;
                if len == 0 {
                    next_chunk = None;
                    finished_with_chunk = true;
                } else if end_of_label >= octets.len() {
                    return Err(Error::UnexpectedEom);
                }
                // A name has at most 128 labels if it fits in 255
                // octets, so the offset push fails only along with the
                // wire push below.
                label_offsets
                    .try_push(wire_repr.len() as u8)
                    .or(Err(Error::NameTooLong))?;
                wire_repr
                    .try_extend_from_slice(&octets[index..end_of_label])
                    .or(Err(Error::NameTooLong))?;
                index = end_of_label;
            }
        }

        wire_len_of_first_chunk.get_or_insert(index - chunk_start);
    }

    let name = Name {
        label_offsets,
        wire_repr,
    };
    // The first chunk is always visited, so this is set.
    Ok((name, wire_len_of_first_chunk.unwrap_or_default()))
}

/// Parses a pointer at `index` in `octets`. This also checks that the
/// pointer refers to an index *earlier* than the start of the chunk it
/// is in (`chunk_start`).
fn parse_pointer(octets: &[u8], chunk_start: usize, index: usize) -> Result<u16, Error> {
    if index + 1 < octets.len() {
        let pointer_bytes = [octets[index], octets[index + 1]];
        let pointer = u16::from_be_bytes(pointer_bytes) & (!0xc000);
        if (pointer as usize) >= chunk_start {
            // According to RFC 1035 § 4.1.4, pointers point to a
            // *prior* occurrence of the name. (Importantly, this
            // prevents loops!)
            Err(Error::InvalidPointer)
        } else {
            Ok(pointer)
        }
    } else {
        Err(Error::UnexpectedEom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_uncompressed_name() {
        let octets = b"\x02c2\x04test\x00junk";
        let (name, len) = parse_compressed_name(octets, 0).unwrap();
        assert_eq!(len, 9);
        assert_eq!(name.to_string(), "c2.test.");
    }

    #[test]
    fn follows_pointers() {
        let octets = b"\x04test\x00\x02c2\xc0\x00";
        let (name, len) = parse_compressed_name(octets, 6).unwrap();
        assert_eq!(len, 5);
        assert_eq!(name.to_string(), "c2.test.");
    }

    #[test]
    fn rejects_forward_and_self_pointers() {
        let octets = b"\xc0\x00";
        assert_eq!(
            parse_compressed_name(octets, 0).unwrap_err(),
            Error::InvalidPointer
        );
        let octets = b"\x01a\xc0\x04\x00";
        assert_eq!(
            parse_compressed_name(octets, 0).unwrap_err(),
            Error::InvalidPointer
        );
    }

    #[test]
    fn rejects_truncated_names() {
        assert_eq!(
            parse_compressed_name(b"\x04tes", 0).unwrap_err(),
            Error::UnexpectedEom
        );
        assert_eq!(
            parse_compressed_name(b"\x04test", 0).unwrap_err(),
            Error::UnexpectedEom
        );
        assert_eq!(
            parse_compressed_name(b"", 0).unwrap_err(),
            Error::UnexpectedEom
        );
    }

    #[test]
    fn rejects_overlong_labels() {
        let mut octets = vec![64];
        octets.extend_from_slice(&[b'a'; 64]);
        octets.push(0);
        assert_eq!(
            parse_compressed_name(&octets, 0).unwrap_err(),
            Error::LabelTooLong
        );
    }
}
