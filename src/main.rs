// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! HFP client trace replay.
//!
//! Reads a JSON-lines trace (file argument or stdin), feeds it through the
//! client service over a stub transport and prints every notification as a
//! JSON line.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hfp_client::config::Config;
use hfp_client::events::ChannelDispatcher;
use hfp_client::hfp::{
    ConnectionPolicy, DeviceAddress, HfpClientService, Message, PolicyTable, StackEvent, StubTransport,
};

/// One line of a replay trace.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TraceEntry {
    /// Transport event, as if reported by the native stack.
    Event(StackEvent),
    /// Local request for one device.
    Command { device: DeviceAddress, message: Message },
    /// Let timers run.
    WaitMs(u64),
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(config.logging.filter.parse::<Directive>()?),
        )
        .init();

    info!("Starting hfp-client v{}...", env!("CARGO_PKG_VERSION"));

    let (dispatcher, notifications) = ChannelDispatcher::new();
    let printer = tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            match serde_json::to_string(&notification) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode {}: {}", notification.as_str(), e),
            }
        }
    });

    let service = HfpClientService::new(
        config,
        Arc::new(StubTransport::logging_only()),
        Arc::new(dispatcher),
        Arc::new(PolicyTable::new(ConnectionPolicy::Unknown)),
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match std::env::args().nth(1) {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("opening trace {}", path))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    tokio::select! {
        result = replay(&service, reader) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    for device in service.active_devices() {
        info!(
            "{}: {} with {} call(s)",
            device,
            service.connection_state(&device).as_str(),
            service.current_calls(&device).len()
        );
    }

    // Dropping the service closes every session, which closes the channel.
    drop(service);
    if let Err(e) = printer.await {
        error!("Notification printer failed: {}", e);
    }

    info!("hfp-client stopped");
    Ok(())
}

async fn replay(service: &HfpClientService, reader: Box<dyn AsyncBufRead + Unpin + Send>) -> Result<()> {
    let mut lines = reader.lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry: TraceEntry =
            serde_json::from_str(line).with_context(|| format!("trace line {}", line_no))?;
        let outcome = match entry {
            TraceEntry::Event(event) => service.handle_stack_event(event),
            TraceEntry::Command {
                device,
                message: Message::Connect(_),
            } => service.connect(device),
            TraceEntry::Command { device, message } => service.send(device, message),
            TraceEntry::WaitMs(ms) => {
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                Ok(())
            }
        };
        if let Err(e) = outcome {
            warn!("trace line {}: {}", line_no, e);
        }
    }

    // Let the sessions drain what was just sent.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    Ok(())
}
