use linkhub::library::helpers::parse_millis;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "Service publishing and remote method calls over a publish/subscribe broker.")]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Output format of log messages
    #[structopt(
        long,
        global = true,
        env,
        default_value = "text",
        possible_values = &["text", "compact", "json"],
        value_name = "format"
    )]
    pub log_format: LogFormat,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {}", other)),
        }
    }
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Hosts the service directory and watches over all clients
    Daemon(DaemonOptions),
    /// Publishes a number of services which sum two integers
    Serve(ServeOptions),
    /// Looks up a service and calls its sum method
    Call(CallOptions),
}

/// Options for connecting to the broker
#[derive(Debug, StructOpt)]
pub struct BrokerOptions {
    /// Redis server URL
    #[structopt(
        short = "r",
        long = "redis",
        env = "REDIS",
        global = true,
        default_value = "redis://127.0.0.1:6379/",
        value_name = "url"
    )]
    pub url: String,
}

/// Options shared by every non-daemon participant
#[derive(Debug, StructOpt)]
pub struct ClientOptions {
    /// Identity on the broker, random if omitted
    #[structopt(long, env)]
    pub id: Option<String>,

    /// Identity of the daemon
    #[structopt(long, env, default_value = "daemon")]
    pub daemon_id: String,

    /// Number of method calls executed concurrently
    #[structopt(long, env, default_value = "8")]
    pub workers: usize,

    /// Timeout in milliseconds for service publishing and lookup
    #[structopt(long, env, default_value = "2000", parse(try_from_str = parse_millis))]
    pub directory_timeout: Duration,
}

#[derive(Debug, StructOpt)]
pub struct DaemonOptions {
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Identity of the daemon
    #[structopt(long, env, default_value = "daemon")]
    pub daemon_id: String,

    /// Pause in milliseconds between two pings of a client
    #[structopt(long, env, default_value = "10000", parse(try_from_str = parse_millis))]
    pub ping_interval: Duration,

    /// Timeout in milliseconds for a single ping
    #[structopt(long, env, default_value = "3000", parse(try_from_str = parse_millis))]
    pub ping_timeout: Duration,

    /// Consecutive failed pings after which a client is evicted
    #[structopt(long, env, default_value = "3")]
    pub max_missed_pings: u32,
}

#[derive(Debug, StructOpt)]
pub struct ServeOptions {
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[structopt(flatten)]
    pub client: ClientOptions,

    /// Number of services to publish
    #[structopt(long, default_value = "1")]
    pub services: usize,

    /// Name prefix of the published services
    #[structopt(long, default_value = "service")]
    pub prefix: String,
}

#[derive(Debug, StructOpt)]
pub struct CallOptions {
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    #[structopt(flatten)]
    pub client: ClientOptions,

    /// Name of the service to call
    pub service: String,

    /// First summand
    pub a: i64,

    /// Second summand
    pub b: i64,

    /// Timeout in milliseconds for each call
    #[structopt(long, default_value = "3000", parse(try_from_str = parse_millis))]
    pub timeout: Duration,

    /// Number of consecutive calls
    #[structopt(long, default_value = "1")]
    pub repeat: usize,
}

#[cfg(test)]
mod does {
    use super::*;
    use linkhub::hub::{
        DEFAULT_DAEMON_ID, DEFAULT_DIRECTORY_TIMEOUT, DEFAULT_MAX_MISSED_PINGS,
        DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT, DEFAULT_WORKERS,
    };

    #[test]
    fn match_library_defaults() {
        let options = MainOptions::from_iter(vec!["linkhub", "daemon"]);

        match options.command {
            Command::Daemon(daemon) => {
                assert_eq!(daemon.ping_interval, DEFAULT_PING_INTERVAL);
                assert_eq!(daemon.ping_timeout, DEFAULT_PING_TIMEOUT);
                assert_eq!(daemon.max_missed_pings, DEFAULT_MAX_MISSED_PINGS);
                assert_eq!(daemon.daemon_id, DEFAULT_DAEMON_ID);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let options = MainOptions::from_iter(vec!["linkhub", "call", "service-0000", "3", "4"]);

        match options.command {
            Command::Call(call) => {
                assert_eq!(call.client.workers, DEFAULT_WORKERS);
                assert_eq!(call.client.directory_timeout, DEFAULT_DIRECTORY_TIMEOUT);
                assert_eq!((call.a, call.b), (3, 4));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
