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

//! The request logger.
//!
//! Every request the server handles produces one line of the form
//! `<sender>: <question>`, where the question's name may be decoded
//! from hexadecimal labels (see [`render`]). Lines are written to a
//! [`LineSink`], not to the `log` facade, so they are emitted no matter
//! what log filter is in effect.

mod codec;
mod render;
pub use codec::{decode_label, strip_suffix, Suffix};
pub use render::{render, RenderedQuestion};

use std::fmt::Write as _;
use std::io::{self, Stdout, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::message::Question;

////////////////////////////////////////////////////////////////////////
// LINE SINKS                                                         //
////////////////////////////////////////////////////////////////////////

/// A destination for request log lines.
///
/// Implementations must write each line with a single, exclusive
/// operation, so that lines from concurrent callers never interleave.
pub trait LineSink: Send + Sync {
    /// Writes `line` followed by a newline.
    fn write_line(&self, line: &str) -> io::Result<()>;
}

impl LineSink for Stdout {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut stdout = self.lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()
    }
}

impl<W: Write + Send> LineSink for Mutex<W> {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut writer = self.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()
    }
}

impl<S: LineSink + ?Sized> LineSink for Arc<S> {
    fn write_line(&self, line: &str) -> io::Result<()> {
        (**self).write_line(line)
    }
}

////////////////////////////////////////////////////////////////////////
// REQUEST LOGGER                                                     //
////////////////////////////////////////////////////////////////////////

/// Logs the questions of incoming requests.
///
/// The suffix and decoding mode are fixed at construction. A
/// `RequestLogger` only ever reads the questions it is given.
pub struct RequestLogger {
    suffix: Suffix,
    hex_encoded: bool,
    sink: Box<dyn LineSink>,
}

impl RequestLogger {
    /// Creates a new `RequestLogger` writing to `sink`.
    pub fn new(suffix: Suffix, hex_encoded: bool, sink: Box<dyn LineSink>) -> Self {
        Self {
            suffix,
            hex_encoded,
            sink,
        }
    }

    /// Creates a new `RequestLogger` writing to standard output.
    pub fn stdout(suffix: Suffix, hex_encoded: bool) -> Self {
        Self::new(suffix, hex_encoded, Box::new(io::stdout()))
    }

    /// Writes one line associating `sender` with `question`. A request
    /// without a question is logged as `(no question)`.
    ///
    /// Control characters (which decoded labels may contain) are
    /// escaped, so the output is always exactly one line.
    pub fn log(&self, sender: SocketAddr, question: Option<&Question>) -> io::Result<()> {
        let line = match question {
            Some(question) => {
                let rendered = render(question, &self.suffix, self.hex_encoded);
                format!("{}: {}", sender, escape_controls(&rendered.to_string()))
            }
            None => format!("{}: (no question)", sender),
        };
        self.sink.write_line(&line)
    }
}

/// Replaces control characters in `text` with their Rust escape
/// sequences (e.g. `\n` or `\u{1b}`).
fn escape_controls(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_control() {
            // Writing to a String cannot fail.
            let _ = write!(escaped, "{}", c.escape_debug());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
