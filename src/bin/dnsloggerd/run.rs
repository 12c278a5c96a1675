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

//! Implements running the daemon.

use std::fmt::Write;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{error, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use dnslogger::resolver::Resolver;
use dnslogger::thread::ThreadGroup;

use crate::args::Args;
use crate::config;

/// The specific [`Server`](dnslogger::server::Server) type we use.
pub type Server = dnslogger::server::Server<Box<dyn Resolver>>;

/// Runs the daemon.
pub fn run(args: Args) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        let mut message = String::from("Failed to run:");
        for (i, cause) in e.chain().enumerate() {
            write!(message, "\n[{}] {}", i + 1, cause).unwrap();
        }
        message.push_str("\nExiting with failure.");
        error!("{}", message);
        process::exit(1);
    }
    info!("Exiting with success.");
}

fn try_running(args: Args) -> Result<()> {
    info!(
        "dnslogger daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    // Get the configuration, either from the file system or from the
    // command line arguments, as appropriate.
    let config = if let Some(ref config_path) = args.config {
        info!("Loading the configuration from {}.", config_path.display());
        config::load_from_path(config_path).context("failed to load the configuration")?
    } else {
        info!("Loading the configuration from the command line.");
        config::load_from_args(args)
    };

    // Bind first so that a taken or privileged port fails fast.
    let io_provider = config
        .io
        .bind_provider(config.bind)
        .context("failed to bind sockets")?;
    let logger = config
        .logger
        .build()
        .context("failed to open the request log")?;
    let server = Arc::new(Server::new(config.resolver.build(), logger));

    // Set up signal handling.
    let signals = set_up_signal_handling().context("failed to set up signal handling")?;

    // Start the I/O provider.
    info!("Set-up is complete; listening on {}.", config.bind);
    let thread_group = ThreadGroup::new();
    io_provider
        .start(&server, &thread_group)
        .context("failed to start the I/O provider")?;

    // Wait for a termination signal.
    wait_for_termination(signals);

    // Shut down the server.
    thread_group.shut_down();
    thread_group.await_shutdown();
    info!("Shutdown complete.");
    Ok(())
}

/// Blocks until SIGINT or SIGTERM arrives.
fn wait_for_termination(mut signals: Signals) {
    if let Some(signal) = signals.forever().next() {
        let name = match signal {
            SIGINT => "SIGINT",
            SIGTERM => "SIGTERM",
            _ => unreachable!(),
        };
        info!("Received {}; shutting down.", name);
    }
}

/// Sets up signal handling. A first SIGINT or SIGTERM is delivered
/// through the returned [`Signals`]; a second one terminates the
/// process immediately.
fn set_up_signal_handling() -> Result<Signals> {
    let already_terminating = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 1, already_terminating.clone())?;
        signal_hook::flag::register(signal, already_terminating.clone())?;
    }
    Signals::new([SIGINT, SIGTERM]).map_err(Into::into)
}
