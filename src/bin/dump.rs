use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};

use clap::Parser;
use colored::{ColoredString, Colorize};
use meiligao::{
    decoder::MeiligaoDecoder,
    protocol::{
        codec::{ascii, Frame},
        commands::Command,
        identity::DeviceIdentity,
    },
    session::{MemoryRegistry, NoServerConfig},
};
use strum::IntoEnumIterator;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing_subscriber::EnvFilter;


/// Decode captured Meiligao frames, one hex encoded frame per line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to read frames from. Reads stdin when omitted.
    ///
    /// Blank lines and lines starting with # are ignored.
    input: Option<PathBuf>,

    /// List the known command codes and exit
    #[arg(long)]
    commands: bool,
}


fn coloured(command: Option<Command>, line: String) -> ColoredString {
    match command {
        Some(Command::Login | Command::LoginResponse | Command::Heartbeat | Command::ServerQuery) => line.on_cyan().bright_white(),
        Some(Command::Position | Command::PositionLogged) => line.on_green().bright_white(),
        Some(Command::Alarm) => line.on_red().bright_white(),
        Some(Command::Rfid) => line.on_blue().bright_white(),
        Some(Command::ObdRealtime | Command::ObdAggregate) => line.on_magenta().bright_white(),
        Some(Command::Retransmission) => line.on_yellow().black(),
        None => line.on_black(),
    }
}

fn describe(frame: &Frame) -> String {
    let identity = DeviceIdentity::decode(&frame.id);

    let command = match frame.command() {
        Some(command) => command.to_string(),
        None => "Unknown".to_string(),
    };

    format!("{identity: <15} {:04x}: {command: <14} {}", frame.command, ascii(&frame.payload).escape_debug())
}


#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if args.commands {
        for command in Command::iter() {
            println!("{}", coloured(Some(command), format!("{:04x}: {command}", command.code())));
        }
        return Ok(());
    }

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    // replayed frames come from devices that were already accepted once
    let registry = Arc::new(MemoryRegistry::accepting_unknown());
    let decoder = MeiligaoDecoder::new(registry.clone(), registry.clone(), Arc::new(NoServerConfig));

    let mut lines = BufReader::new(input).lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let bytes = match hex::decode(line.replace(' ', "")) {
            Ok(bytes) => bytes,
            Err(error) => {
                println!("{line_no:5}: invalid hex: {error}");
                continue;
            }
        };

        let frame = match Frame::parse(&bytes) {
            Ok(frame) => frame,
            Err(error) => {
                println!("{line_no:5}: {error}: {bytes:02x?}");
                continue;
            }
        };

        println!("{}", coloured(frame.command(), format!("{line_no:5}: {}", describe(&frame))));

        match decoder.decode(&frame, None) {
            Ok(decoded) => {
                for position in decoded.into_positions() {
                    println!("       {position}");
                    registry.record(&position);
                }
            }
            Err(error) => println!("       {}", error.to_string().red()),
        }
    }

    Ok(())
}
