use anyhow::{Context, Result};
use linkhub::harness::Heart;
use linkhub::hub::{Hub, HubOptions};
use linkhub::library::communication::transport::RedisTransport;
use linkhub::library::communication::Message;
use linkhub::library::BoxedError;
use options::{
    BrokerOptions, CallOptions, ClientOptions, Command, DaemonOptions, LogFormat, ServeOptions,
};
use std::sync::Arc;
use structopt::StructOpt;
use tracing::{debug, error, info};

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let command = init();

    match command {
        Command::Daemon(options) => daemon(options).await,
        Command::Serve(options) => serve(options).await,
        Command::Call(options) => call(options).await,
    }
}

fn init() -> Command {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    info!("linkhub {}", env!("CARGO_PKG_VERSION"));

    options.command
}

async fn connect(broker: &BrokerOptions, options: HubOptions) -> Result<Hub> {
    let transport = RedisTransport::connect(&broker.url)
        .await
        .with_context(|| format!("unable to connect to {}", broker.url))?;

    Hub::initialize(options, Arc::new(transport))
        .await
        .context("unable to initialize hub")
}

fn client_options(options: &ClientOptions) -> HubOptions {
    let hub_options = match &options.id {
        Some(id) => HubOptions::client(id),
        None => HubOptions::default(),
    };

    hub_options
        .with_daemon_id(&options.daemon_id)
        .with_workers(options.workers)
        .with_directory_timeout(options.directory_timeout)
}

async fn daemon(options: DaemonOptions) -> Result<()> {
    let hub_options = HubOptions::daemon()
        .with_daemon_id(&options.daemon_id)
        .with_liveness(
            options.ping_interval,
            options.ping_timeout,
            options.max_missed_pings,
        );

    let _hub = connect(&options.broker, hub_options).await?;
    let (mut heart, _stone) = Heart::new();

    let reason = heart.death().await;
    info!(%reason, "Daemon stopped");

    Ok(())
}

fn sum(input: &Message) -> Result<Message, BoxedError> {
    let mut output = Message::new();
    output.set_int("result", input.get_int("a")? + input.get_int("b")?);
    Ok(output)
}

async fn serve(options: ServeOptions) -> Result<()> {
    let hub = connect(&options.broker, client_options(&options.client)).await?;

    for index in 0..options.services {
        let name = format!("{}-{:04}", options.prefix, index);
        let service = hub.create_local_service(&name)?;
        service.register_method("sum", sum)?;

        match hub.add_service_default(&service).await {
            Ok(()) => info!(service = %name, "Published service"),
            Err(e) => error!(service = %name, error = %e, "Unable to publish service"),
        }
    }

    let (mut heart, _stone) = Heart::new();
    let reason = heart.death().await;
    info!(%reason, client = hub.client_id(), "Server stopped");

    Ok(())
}

async fn call(options: CallOptions) -> Result<()> {
    let hub = connect(&options.broker, client_options(&options.client)).await?;

    let service = hub
        .get_service_default(&options.service)
        .await
        .with_context(|| format!("unable to look up {}", options.service))?;

    let mut input = Message::named("sum");
    input.set_int("a", options.a).set_int("b", options.b);
    debug!(%input, service = service.name(), owner = service.owner(), "Calling method");

    for _ in 0..options.repeat {
        let output = hub
            .call_method(&service, "sum", &input, options.timeout)
            .await
            .with_context(|| format!("call to {} failed", service.name()))?;

        println!("{}", output.to_text());
    }

    Ok(())
}
