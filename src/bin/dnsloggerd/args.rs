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

//! Implements command-line argument parsing.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// Logs incoming DNS queries, optionally decoding hex-encoded labels
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// Set the configuration file to use
    #[clap(
        long,
        value_name = "FILE",
        conflicts_with_all = ["address", "port", "hex_encoded", "suffix", "upstream", "output"]
    )]
    pub config: Option<PathBuf>,

    /// Set the IP address to listen on [default: 127.0.0.1]
    #[clap(short, long, value_name = "HOST")]
    pub address: Option<IpAddr>,

    /// Set the UDP port to listen on [default: 53]
    #[clap(short, long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Decode hex-encoded labels in front of the suffix
    #[clap(short = 'x', long)]
    pub hex_encoded: bool,

    /// Set the name suffix behind the encoded labels
    #[clap(short, long, value_name = "SUFFIX")]
    pub suffix: Option<String>,

    /// Forward queries to this server instead of answering NXDOMAIN
    #[clap(long, value_name = "IP:PORT")]
    pub upstream: Option<SocketAddr>,

    /// Append request lines to this file instead of standard output
    #[clap(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}
