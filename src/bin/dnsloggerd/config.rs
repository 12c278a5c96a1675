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

//! Implements the daemon configuration file.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::Level::Debug;
use log::{debug, log_enabled};
use paste::paste;
use serde::{de, Deserialize};

use dnslogger::logger::{RequestLogger, Suffix};
use dnslogger::resolver::{self, ForwardingResolver, NxdomainResolver, Resolver};
use dnslogger::thread::{self, ThreadGroup};

use crate::args::Args;
use crate::run::Server;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the daemon configuration from the file given by `path`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let raw_config = fs::read(path.as_ref()).context("failed to read the configuration file")?;
    let config: Config =
        toml::from_slice(&raw_config).context("failed to parse the configuration file")?;
    config.validate()?;
    log_config_summary(&config);
    Ok(config)
}

/// Loads the daemon configuration from the parsed command line
/// arguments given by `args`.
pub fn load_from_args(args: Args) -> Config {
    let ip = args.address.unwrap_or(DEFAULT_BIND_IP);
    let port = args.port.unwrap_or(DEFAULT_BIND_PORT);

    let resolver = match args.upstream {
        Some(upstream) => ResolverConfig::Forward {
            upstream,
            timeout: default_forward_timeout(),
        },
        None => ResolverConfig::Nxdomain,
    };

    let config = Config {
        bind: SocketAddr::new(ip, port),
        io: default_io_provider_config(),
        logger: LoggerConfig {
            hex_encoded: args.hex_encoded,
            suffix: args.suffix.map(|s| ConfigSuffix(Suffix::new(&s))),
            output: args.output,
        },
        resolver,
    };
    log_config_summary(&config);
    config
}

/// Summarizes the configuration in the log, if the debug log level is
/// enabled.
fn log_config_summary(config: &Config) {
    if !log_enabled!(Debug) {
        // Don't compute the message if it will never be printed.
        return;
    }

    let suffix = match config.logger.suffix {
        Some(ref suffix) if !suffix.0.is_empty() => suffix.0.as_str(),
        _ => "none",
    };
    let output = match config.logger.output {
        Some(ref path) => path.display().to_string(),
        None => "standard output".to_owned(),
    };

    debug!(
        "Configuration loaded:\n\
         Bind address: {}\n\
         I/O provider: {}\n\
         Hex decoding: {}\n\
         Suffix:       {}\n\
         Output:       {}\n\
         Resolver:     {}",
        config.bind,
        config.io.name(),
        if config.logger.hex_encoded { "enabled" } else { "disabled" },
        suffix,
        output,
        config.resolver,
    );
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default = "default_io_provider_config")]
    pub io: IoProviderConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const DEFAULT_BIND_PORT: u16 = 53;

fn default_bind() -> SocketAddr {
    SocketAddr::new(DEFAULT_BIND_IP, DEFAULT_BIND_PORT)
}

impl Config {
    /// Checks constraints that deserialization alone does not enforce.
    fn validate(&self) -> Result<()> {
        if self.bind.port() == 0 {
            return Err(anyhow!("the bind port must be between 1 and 65535"));
        }
        if self.io.max_in_flight() == Some(0) {
            return Err(anyhow!("max_in_flight must be at least 1"));
        }
        if let ResolverConfig::Forward { timeout: 0, .. } = self.resolver {
            return Err(anyhow!("the forwarding timeout must be at least 1 second"));
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: I/O PROVIDERS                               //
////////////////////////////////////////////////////////////////////////

/// An abstraction over all supported I/O providers.
pub trait IoProvider {
    fn start(
        self: Box<Self>,
        server: &Arc<Server>,
        group: &Arc<ThreadGroup>,
    ) -> Result<(), thread::Error>;
}

/// The selection of I/O provider and its configuration.
///
/// To actually create the selected provider with its configuration and
/// bind it to an address, use [`IoProviderConfig::bind_provider`].
#[derive(Debug, Deserialize)]
#[serde(tag = "provider")]
pub enum IoProviderConfig {
    #[serde(rename = "blocking")]
    Blocking(blocking_io::Config),
    #[cfg(feature = "tokio")]
    #[serde(rename = "tokio")]
    Tokio(tokio_io::Config),
}

impl IoProviderConfig {
    /// Returns the name of the selected I/O provider.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocking(_) => "blocking",
            #[cfg(feature = "tokio")]
            Self::Tokio(_) => "tokio",
        }
    }

    /// Returns the configured limit on datagrams handled at once.
    pub fn max_in_flight(&self) -> Option<usize> {
        match self {
            Self::Blocking(config) => config.max_in_flight,
            #[cfg(feature = "tokio")]
            Self::Tokio(config) => config.max_in_flight,
        }
    }

    /// Creates the selected I/O provider with this configuration and
    /// binds it to the provided address.
    pub fn bind_provider(&self, addr: SocketAddr) -> io::Result<Box<dyn IoProvider>> {
        match self {
            Self::Blocking(config) => {
                let io_provider = dnslogger::io::BlockingIoProvider::bind(config.into(), [addr])?;
                Ok(Box::new(io_provider))
            }
            #[cfg(feature = "tokio")]
            Self::Tokio(config) => Ok(Box::new(tokio_io::TokioRunner::bind(config, addr)?)),
        }
    }
}

/// Support for the
/// [`BlockingIoProvider`](dnslogger::io::BlockingIoProvider).
mod blocking_io {
    use super::*;
    use dnslogger::io::{BlockingIoConfig, BlockingIoProvider};

    impl IoProvider for BlockingIoProvider {
        fn start(
            self: Box<Self>,
            server: &Arc<Server>,
            group: &Arc<ThreadGroup>,
        ) -> Result<(), thread::Error> {
            BlockingIoProvider::start(*self, server, group)
        }
    }

    /// Provider configuration for the [`BlockingIoProvider`]. This
    /// mirrors [`BlockingIoConfig`] and can be converted into one; its
    /// purpose is basically to make the configuration deserializable
    /// and to provide defaults.
    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Config {
        #[serde(default = "default_base_workers")]
        pub(super) base_workers: usize,
        pub(super) max_in_flight: Option<usize>,
    }

    fn default_base_workers() -> usize {
        BlockingIoConfig::default().base_workers
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                base_workers: default_base_workers(),
                max_in_flight: None,
            }
        }
    }

    impl From<&Config> for BlockingIoConfig {
        fn from(toml_config: &Config) -> Self {
            Self {
                base_workers: toml_config.base_workers,
                max_in_flight: toml_config.max_in_flight,
            }
        }
    }
}

/// Support for the [`TokioIoProvider`](dnslogger::io::TokioIoProvider).
///
/// The provider gets a runtime of its own. A thread in the
/// [`ThreadGroup`] drives the runtime and shuts the provider down once
/// the group shuts down, so the daemon stops both providers the same
/// way.
#[cfg(feature = "tokio")]
mod tokio_io {
    use super::*;
    use ::tokio::runtime::{self, Runtime};
    use dnslogger::io::{TokioIoConfig, TokioIoProvider, CHECK_FOR_SHUTDOWN_TIMEOUT};

    /// Provider configuration for the [`TokioIoProvider`].
    #[derive(Debug, Default, Deserialize)]
    #[serde(deny_unknown_fields)]
    pub struct Config {
        pub(super) max_in_flight: Option<usize>,
    }

    impl From<&Config> for TokioIoConfig {
        fn from(toml_config: &Config) -> Self {
            Self {
                max_in_flight: toml_config.max_in_flight,
            }
        }
    }

    /// A bound [`TokioIoProvider`] along with the runtime it was bound
    /// on.
    pub struct TokioRunner {
        runtime: Runtime,
        provider: TokioIoProvider,
    }

    impl TokioRunner {
        pub fn bind(config: &Config, addr: SocketAddr) -> io::Result<Self> {
            let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
            let provider = runtime.block_on(TokioIoProvider::bind(config.into(), [addr]))?;
            Ok(Self { runtime, provider })
        }
    }

    impl IoProvider for TokioRunner {
        fn start(
            self: Box<Self>,
            server: &Arc<Server>,
            group: &Arc<ThreadGroup>,
        ) -> Result<(), thread::Error> {
            let Self { runtime, provider } = *self;
            let server = server.clone();
            let group_clone = group.clone();
            group.spawn("tokio runtime".to_owned(), move || {
                runtime.block_on(async move {
                    let controller = provider.start(&server);
                    while !group_clone.is_shutting_down() {
                        ::tokio::time::sleep(CHECK_FOR_SHUTDOWN_TIMEOUT).await;
                    }
                    controller.shut_down().await;
                });
            })
        }
    }
}

fn default_io_provider_config() -> IoProviderConfig {
    IoProviderConfig::Blocking(blocking_io::Config::default())
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: LOGGER                                      //
////////////////////////////////////////////////////////////////////////

/// The configuration of the request logger.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggerConfig {
    #[serde(default)]
    pub hex_encoded: bool,
    pub suffix: Option<ConfigSuffix>,
    pub output: Option<PathBuf>,
}

impl LoggerConfig {
    /// Returns the configured suffix, or the empty suffix if there is
    /// none.
    pub fn suffix(&self) -> Suffix {
        self.suffix.as_ref().map(|s| s.0.clone()).unwrap_or_default()
    }

    /// Creates the request logger. Request lines go to standard output
    /// unless an output file is configured, in which case they are
    /// appended to it.
    pub fn build(&self) -> io::Result<RequestLogger> {
        match self.output {
            Some(ref path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(RequestLogger::new(
                    self.suffix(),
                    self.hex_encoded,
                    Box::new(Mutex::new(file)),
                ))
            }
            None => Ok(RequestLogger::stdout(self.suffix(), self.hex_encoded)),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION SECTION: RESOLVER                                    //
////////////////////////////////////////////////////////////////////////

/// The selection of resolver and its configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(tag = "kind", deny_unknown_fields)]
pub enum ResolverConfig {
    #[default]
    #[serde(rename = "nxdomain")]
    Nxdomain,
    #[serde(rename = "forward")]
    Forward {
        upstream: SocketAddr,
        #[serde(default = "default_forward_timeout")]
        timeout: u64,
    },
}

fn default_forward_timeout() -> u64 {
    resolver::DEFAULT_TIMEOUT.as_secs()
}

impl ResolverConfig {
    /// Creates the selected resolver.
    pub fn build(&self) -> Box<dyn Resolver> {
        match *self {
            Self::Nxdomain => Box::new(NxdomainResolver),
            Self::Forward { upstream, timeout } => Box::new(ForwardingResolver::new(
                upstream,
                Duration::from_secs(timeout),
            )),
        }
    }
}

impl fmt::Display for ResolverConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Nxdomain => f.write_str("answer NXDOMAIN"),
            Self::Forward { upstream, timeout } => {
                write!(f, "forward to {} (timeout {} s)", upstream, timeout)
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER DNSLOGGER TYPES FOR SERDE                            //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type
/// from [`dnslogger`], using its [`FromStr`](std::str::FromStr)
/// implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper over a [`dnslogger`]
        /// type.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigSuffix, Suffix, "name suffix");

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    fn parse(text: &str) -> Config {
        let config: Config = toml::from_str(text).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = parse("");
        assert_eq!(config.bind, "127.0.0.1:53".parse().unwrap());
        assert_eq!(config.io.name(), "blocking");
        assert_eq!(config.io.max_in_flight(), None);
        assert!(!config.logger.hex_encoded);
        assert!(config.logger.suffix().is_empty());
        assert!(config.logger.output.is_none());
        assert!(matches!(config.resolver, ResolverConfig::Nxdomain));
    }

    #[test]
    fn full_config_parses() {
        let config = parse(
            r#"
            bind = "0.0.0.0:5353"

            [io]
            provider = "blocking"
            base_workers = 4
            max_in_flight = 1024

            [logger]
            hex_encoded = true
            suffix = "c2.test"
            output = "requests.log"

            [resolver]
            kind = "forward"
            upstream = "9.9.9.9:53"
            timeout = 2
            "#,
        );
        assert_eq!(config.bind, "0.0.0.0:5353".parse().unwrap());
        assert_eq!(config.io.max_in_flight(), Some(1024));
        match config.io {
            IoProviderConfig::Blocking(ref io) => assert_eq!(io.base_workers, 4),
            #[cfg(feature = "tokio")]
            _ => panic!("wrong provider"),
        }
        assert!(config.logger.hex_encoded);
        assert_eq!(config.logger.suffix().as_str(), ".c2.test.");
        assert_eq!(config.logger.output, Some(PathBuf::from("requests.log")));
        match config.resolver {
            ResolverConfig::Forward { upstream, timeout } => {
                assert_eq!(upstream, "9.9.9.9:53".parse().unwrap());
                assert_eq!(timeout, 2);
            }
            _ => panic!("wrong resolver"),
        }
    }

    #[test]
    fn forward_timeout_defaults() {
        let config = parse("[resolver]\nkind = \"forward\"\nupstream = \"127.0.0.1:5300\"\n");
        match config.resolver {
            ResolverConfig::Forward { timeout, .. } => assert_eq!(timeout, 5),
            _ => panic!("wrong resolver"),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(toml::from_str::<Config>("colour = \"blue\"").is_err());
        assert!(toml::from_str::<Config>("[logger]\nsufix = \"c2.test\"").is_err());
        assert!(toml::from_str::<Config>("[io]\nprovider = \"blocking\"\nworkers = 2").is_err());
        assert!(toml::from_str::<Config>("[resolver]\nkind = \"recursive\"").is_err());
    }

    #[test]
    fn validation_rejects_zero_values() {
        let zero_port: Config = toml::from_str("bind = \"127.0.0.1:0\"").unwrap();
        assert!(zero_port.validate().is_err());
        let zero_limit: Config =
            toml::from_str("[io]\nprovider = \"blocking\"\nmax_in_flight = 0").unwrap();
        assert!(zero_limit.validate().is_err());
        let zero_timeout: Config = toml::from_str(
            "[resolver]\nkind = \"forward\"\nupstream = \"127.0.0.1:53\"\ntimeout = 0",
        )
        .unwrap();
        assert!(zero_timeout.validate().is_err());
    }

    #[test]
    fn args_produce_config() {
        let args = Args::parse_from([
            "dnsloggerd",
            "-a",
            "::1",
            "-p",
            "5353",
            "-x",
            "-s",
            ".c2.test",
            "--upstream",
            "127.0.0.1:5300",
        ]);
        let config = load_from_args(args);
        assert_eq!(config.bind, "[::1]:5353".parse().unwrap());
        assert!(config.logger.hex_encoded);
        assert_eq!(config.logger.suffix().as_str(), ".c2.test.");
        assert!(matches!(config.resolver, ResolverConfig::Forward { .. }));
    }

    #[test]
    fn args_default_to_localhost_port_53() {
        let config = load_from_args(Args::parse_from(["dnsloggerd"]));
        assert_eq!(config.bind, "127.0.0.1:53".parse().unwrap());
        assert!(config.logger.suffix().is_empty());
        assert!(matches!(config.resolver, ResolverConfig::Nxdomain));
    }

    #[test]
    fn logger_config_appends_to_output_file() {
        let path = std::env::temp_dir().join(format!("dnsloggerd-test-{}.log", std::process::id()));
        let _ = fs::remove_file(&path);
        let logger_config = LoggerConfig {
            hex_encoded: false,
            suffix: None,
            output: Some(path.clone()),
        };
        for _ in 0..2 {
            let logger = logger_config.build().unwrap();
            logger
                .log("127.0.0.1:4000".parse().unwrap(), None)
                .unwrap();
        }
        let contents = fs::read_to_string(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.starts_with("127.0.0.1:4000: "));
    }
}
