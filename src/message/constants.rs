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

//! Layout of the fixed DNS message header (RFC 1035 § 4.1.1).

/// The length of the header in octets.
pub const HEADER_SIZE: usize = 12;

/// The offset of the ID field.
pub const ID: usize = 0;

/// The offset of the flag octet holding QR, OPCODE, AA, TC and RD.
pub const FLAGS_HI: usize = 2;

/// The offset of the flag octet holding RA, Z, AD, CD and RCODE.
pub const FLAGS_LO: usize = 3;

// Masks within FLAGS_HI.
pub const QR: u8 = 0x80;
pub const OPCODE: u8 = 0x78;
pub const OPCODE_SHIFT: usize = 3;
pub const AA: u8 = 0x04;
pub const TC: u8 = 0x02;
pub const RD: u8 = 0x01;

// Masks within FLAGS_LO.
pub const RA: u8 = 0x80;
pub const Z: u8 = 0x40;
pub const AD: u8 = 0x20;
pub const CD: u8 = 0x10;
pub const RCODE: u8 = 0x0f;

/// The offsets of the section counts.
pub const QDCOUNT: usize = 4;
pub const ANCOUNT: usize = 6;
pub const NSCOUNT: usize = 8;
pub const ARCOUNT: usize = 10;
