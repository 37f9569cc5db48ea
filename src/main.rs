// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `fanbridge` daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fanbridge::bridge::Bridge;
use fanbridge::bus::MqttBus;
use fanbridge::config::{BridgeConfig, Settings};
use fanbridge::protocol::HttpConfig;

/// Bridge network-attached ceiling fans to an MQTT bus.
#[derive(Debug, Parser)]
#[command(name = "fanbridge", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log lifecycle events.
    #[arg(short, long)]
    verbose: bool,

    /// Log everything.
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,fanbridge={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            tracing::error!(path = %cli.config.display(), error = %e, "Cannot load configuration");
            return ExitCode::FAILURE;
        }
    };

    let level = if cli.debug || config.debug.is_set() {
        "debug"
    } else if cli.verbose || config.verbose.is_set() {
        "info"
    } else {
        "warn"
    };
    init_tracing(level);

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Bridge stopped");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(config: &BridgeConfig) -> fanbridge::Result<()> {
    let settings = Settings::from_config(config)?;
    let factory = HttpConfig::new().into_factory()?;

    let conf = &config.mqtt_conf;
    let mut bus = MqttBus::builder().host(&conf.host).port(conf.port);
    if let Some(username) = &conf.username {
        bus = bus.credentials(username, conf.password.clone().unwrap_or_default());
    }
    if let Some(secs) = conf.keepalive {
        bus = bus.keep_alive(Duration::from_secs(secs));
    }
    if let Some(client_id) = &conf.client_id {
        bus = bus.client_id(client_id);
    }
    if let Some(topic) = &settings.status_topic {
        bus = bus.last_will(topic, "stop");
    }

    let subscriptions =
        fanbridge::router::TopicRouter::new(&settings.router_topics())?.subscriptions();
    let (publisher, events) = bus.connect(subscriptions).await?;

    let bridge = Bridge::new(settings, factory, publisher)?;
    bridge.start();
    Err(bridge.run(events).await)
}
