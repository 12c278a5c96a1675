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

//! Rendering of questions for the request log.

use std::fmt;

use super::codec::{decode_label, strip_suffix, Suffix};
use crate::message::{Qclass, Qtype, Question};

/// A human-readable rendering of a [`Question`].
///
/// The name is plain text rather than a [`Name`](crate::name::Name),
/// since decoded labels need not be valid DNS labels. It is displayed
/// in the same order as a [`Question`]: name, QCLASS, then QTYPE.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderedQuestion {
    pub name: String,
    pub qclass: Qclass,
    pub qtype: Qtype,
}

impl fmt::Display for RenderedQuestion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qclass, self.qtype)
    }
}

/// Renders `question` for logging.
///
/// Without `hex_encoded`, the name is the question's name as is. With
/// it, `suffix` is stripped from the textual name, each remaining
/// label is decoded with [`decode_label`], and the labels are joined
/// back together with the suffix appended.
pub fn render(question: &Question, suffix: &Suffix, hex_encoded: bool) -> RenderedQuestion {
    let qname = question.qname.to_string();
    let name = if hex_encoded {
        let mut decoded = strip_suffix(&qname, suffix)
            .split('.')
            .map(decode_label)
            .collect::<Vec<_>>()
            .join(".");
        decoded.push_str(suffix.as_str());
        decoded
    } else {
        qname
    };
    RenderedQuestion {
        name,
        qclass: question.qclass,
        qtype: question.qtype,
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::rr::Type;

    fn question(qname: &str) -> Question {
        Question {
            qname: qname.parse().unwrap(),
            qtype: Type::TXT.into(),
            qclass: Class::IN.into(),
        }
    }

    #[test]
    fn render_decodes_labels_before_suffix() {
        let suffix = Suffix::new("c2.test");
        let rendered = render(&question("68656c6c6f.c2.test."), &suffix, true);
        assert_eq!(rendered.name, "hello.c2.test.");
        assert_eq!(rendered.to_string(), "hello.c2.test. IN TXT");
    }

    #[test]
    fn render_decodes_each_label_independently() {
        let suffix = Suffix::new("c2.test");
        let rendered = render(&question("6869.www.776f726c64.c2.test."), &suffix, true);
        assert_eq!(rendered.name, "hi.www.world.c2.test.");
    }

    #[test]
    fn render_without_matching_suffix_decodes_whole_name() {
        // The trailing empty label decodes to itself, and the suffix is
        // still appended.
        let suffix = Suffix::new("c2.test");
        let rendered = render(&question("6869.example."), &suffix, true);
        assert_eq!(rendered.name, "hi.example..c2.test.");
    }

    #[test]
    fn render_with_empty_suffix() {
        let rendered = render(&question("6869.example."), &Suffix::new(""), true);
        assert_eq!(rendered.name, "hi.example.");
    }

    #[test]
    fn render_without_hex_mode_keeps_wire_name() {
        let suffix = Suffix::new("c2.test");
        for qname in ["68656c6c6f.c2.test.", "www.example.com.", "."] {
            let question = question(qname);
            let rendered = render(&question, &suffix, false);
            assert_eq!(rendered.name, question.qname.to_string());
            assert_eq!(rendered.to_string(), question.to_string());
        }
    }

    #[test]
    fn render_does_not_touch_question() {
        let question = question("68656c6c6f.c2.test.");
        let before = question.clone();
        render(&question, &Suffix::new("c2.test"), true);
        assert_eq!(question, before);
        assert_eq!(question.qname.to_string(), "68656c6c6f.c2.test.");
    }
}
