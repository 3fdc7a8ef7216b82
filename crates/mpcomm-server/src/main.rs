//! mpcomm server - remote file navigation over the message-passing substrate.
//!
//! `serve` runs the navigation server on a fixed endpoint. `send` is a
//! minimal client: it posts one request and prints the first reply.

mod handlers;
mod navigation;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use handlers::ServerState;
use mpcomm::{Comm, EndpointAddress, Envelope, ReceiverConfig, SenderConfig};
use navigation::Navigator;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "mpcomm-server")]
#[command(about = "Remote file navigation server")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve a folder tree to navigation clients
    Serve {
        /// Host name used in the endpoint address
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Folder served as the navigation root
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Folder that files uploaded by clients are written to
        #[arg(long, default_value = ".")]
        uploads: PathBuf,
    },

    /// Post one request and print the first reply
    Send {
        /// Destination endpoint, e.g. http://localhost:8080/MessagePassingComm
        #[arg(long)]
        to: String,

        /// Command name, e.g. getTopFiles
        #[arg(long)]
        command: String,

        /// Host name used in this client's endpoint address
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Local port to receive the reply on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Folder that files sent back by the server are written to
        #[arg(long, default_value = ".")]
        downloads: PathBuf,

        /// Seconds to wait for the reply
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Command arguments
        arguments: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            host,
            port,
            root,
            uploads,
        } => serve(&host, port, root, uploads).await,
        Command::Send {
            to,
            command,
            host,
            port,
            downloads,
            timeout,
            arguments,
        } => {
            send(
                &to,
                &command,
                arguments,
                &host,
                port,
                downloads,
                Duration::from_secs(timeout),
            )
            .await
        }
    }
}

async fn serve(host: &str, port: u16, root: PathBuf, uploads: PathBuf) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("navigation root {} is not accessible", root.display()))?;
    info!("Serving {}", root.display());

    let comm = Comm::with_config(
        &format!("http://{}", host),
        port,
        SenderConfig::default(),
        ReceiverConfig::new().with_file_root(uploads),
    )
    .await?;

    // Print endpoint for launchers to read (intentional stdout)
    println!("MPCOMM_ENDPOINT={}", comm.endpoint());

    let mut state = ServerState {
        comm,
        navigator: Navigator::new(root),
    };

    let interrupted = tokio::select! {
        result = server::run(&mut state) => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Shutdown signal received, exiting");
        state.comm.close().await;
    }
    Ok(())
}

async fn send(
    to: &str,
    command: &str,
    arguments: Vec<String>,
    host: &str,
    port: u16,
    downloads: PathBuf,
    timeout: Duration,
) -> Result<()> {
    let destination = EndpointAddress::parse(to)?;
    let comm = Comm::with_config(
        &format!("http://{}", host),
        port,
        SenderConfig::default(),
        ReceiverConfig::new().with_file_root(downloads),
    )
    .await?;

    comm.post_message(
        Envelope::request(command)
            .with_to(destination.to_string())
            .with_from(comm.endpoint().to_string())
            .with_arguments(arguments),
    );

    let reply = tokio::time::timeout(timeout, comm.get_message())
        .await
        .with_context(|| format!("no reply from {} within {:?}", destination, timeout))??;
    println!("{}", reply);

    comm.close().await;
    Ok(())
}
