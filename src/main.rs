use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;

use clap::Parser;
use futures::{SinkExt, StreamExt};
use meiligao::{
    config::{DeviceStream, Listener, Settings},
    decoder::{Connection, MeiligaoDecoder},
    session::{ConnectionChannel, MemoryRegistry},
};
use tracing::Instrument;
use tracing_subscriber::EnvFilter;
use url::Url;


/// Tracking server for Meiligao GPS devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL to listen on for device connections (tcp://host:port)
    #[arg(default_value = "tcp://0.0.0.0:5009")]
    listen: Url,

    /// host:port handed to devices that ask which server to report to.
    ///
    /// Defaults to the address the device connected to.
    #[arg(long)]
    server: Option<String>,

    /// Identifier (IMEI or serial) of a device to accept reports from
    #[arg(long = "device")]
    devices: Vec<String>,

    /// Accept reports from devices that aren't listed with --device
    #[arg(long)]
    accept_unknown: bool,
}


#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let registry = Arc::new(if args.accept_unknown {
        MemoryRegistry::accepting_unknown()
    } else {
        MemoryRegistry::new()
    });

    for identifier in &args.devices {
        let id = registry.register(identifier.as_str());
        tracing::info!(%identifier, device = %id, "device registered");
    }

    let decoder = MeiligaoDecoder::new(registry.clone(), registry.clone(), Arc::new(Settings::new(args.server)));

    let listener = Listener::bind(&args.listen).await?;

    tracing::info!(address = %listener.local_addr()?, "listening for devices");

    loop {
        let (framed, local, remote) = match listener.accept().await {
            Ok(connection) => connection,
            Err(error) => {
                tracing::warn!(%error, "failed to accept connection");
                continue;
            }
        };

        tracing::info!(%remote, "new connection");

        let decoder = decoder.clone();
        let registry = registry.clone();

        tokio::spawn(
            async move {
                if let Err(error) = process(framed, local, remote, decoder, registry).await {
                    tracing::warn!(%error, "connection failed");
                }
                tracing::info!("connection closed");
            }
            .instrument(tracing::info_span!("connection", %remote)),
        );
    }
}

async fn process(
    framed: DeviceStream,
    local: SocketAddr,
    remote: SocketAddr,
    decoder: MeiligaoDecoder,
    registry: Arc<MemoryRegistry>,
) -> Result<()> {
    let (mut sink, mut stream) = framed.split();
    let (mut channel, mut replies) = ConnectionChannel::new(local);

    let writer = tokio::spawn(
        async move {
            while let Some(frame) = replies.recv().await {
                if let Err(error) = sink.send(frame).await {
                    tracing::warn!(%error, "failed to send reply");
                    break;
                }
            }
        }
        .in_current_span(),
    );

    while let Some(frame) = stream.next().await {
        let frame = frame?;

        match decoder.decode(&frame, Some(Connection { channel: &mut channel, remote })) {
            Ok(decoded) => {
                for position in decoded.into_positions() {
                    tracing::info!(%position, "report");
                    registry.record(&position);
                }
            }
            Err(error) => tracing::warn!(%error, command = frame.command, "failed to decode frame"),
        }
    }

    // closing the channel lets the writer drain and finish
    drop(channel);
    writer.await?;

    Ok(())
}
