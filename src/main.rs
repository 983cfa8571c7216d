//! Binary entry point for chatchain.

use std::env;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use log::error;
use tokio::io::{AsyncBufReadExt, BufReader};

// ----- Crate imports -----
use chatchain::config::Config;
use chatchain::network::{listener, peer};
use chatchain::node::Node;

#[derive(Debug, Clone)]
struct CliArgs {
    /// Address or hostname of the initial peer to contact.
    initial_peer: String,
    /// Public IPv4 address of this machine, dotted form.
    local_addr: String,
    /// Optional TOML file with timing/logging tunables.
    config: Option<PathBuf>,
}

fn parse_args() -> Option<CliArgs> {
    let mut positional: Vec<String> = Vec::new();
    let mut config = None;
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => match args.next() {
                Some(path) => config = Some(PathBuf::from(path)),
                None => {
                    eprintln!("Missing value after --config");
                    return None;
                }
            },
            "--help" | "-h" => return None,
            other => positional.push(other.to_string()),
        }
    }

    if positional.len() != 2 {
        return None;
    }
    let mut positional = positional.into_iter();
    Some(CliArgs {
        initial_peer: positional.next()?,
        local_addr: positional.next()?,
        config,
    })
}

fn print_usage() {
    eprintln!(
        "\
chatchain

USAGE:
  chatchain <peer-host> <local-ipv4> [--config <path>]

ARGS:
  <peer-host>    address or hostname of the initial peer to contact
  <local-ipv4>   public IPv4 address of this machine, dotted form

FLAGS:
  --config <path>   load timing/logging tunables from a TOML file
  -h, --help        show this help and exit
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args() else {
        print_usage();
        return Ok(());
    };

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    let local_addr: Ipv4Addr = args
        .local_addr
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid local IPv4 address '{}'", args.local_addr))?;

    let node = Node::new(local_addr, config.network.clone());

    // Incoming peers first, so the initial peer can poll us right away.
    tokio::spawn(listener::run(node.clone()));

    // Best-effort connection to the initial peer.
    match peer::connect_to(&args.initial_peer, config.network.connect_timeout()).await {
        Ok(stream) => {
            let mut registry = node.peers().lock().await;
            if let Err(e) = peer::register_and_spawn(&node, &mut registry, stream) {
                error!("could not set up the initial peer: {e}");
            }
        }
        Err(e) => error!("could not connect to the initial peer: {e}"),
    }

    // Line-oriented loop: every line becomes a mined chat message, `exit`
    // ends the process.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Enter a chat message to send (max 255 characters):");
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        if line == "exit" {
            break;
        }

        match node.submit_line(line.as_bytes()).await {
            Ok(mined) => {
                println!("Message added to the archive ({} bytes)", mined.length);
                println!("nonce: {}", hex::encode(mined.nonce));
                println!("md5: {}", hex::encode(mined.digest));
                println!("{}", node.render_archive().await);
            }
            Err(e) => eprintln!("Invalid message ({e}), try again."),
        }
    }

    Ok(())
}
