//! Entry point for the `roo-sniffer` binary.

use clap::{Parser, Subcommand};

use roo_sniffer::cli::{CertCommand, ServeArgs};

#[derive(Debug, Parser)]
#[command(name = "roo-sniffer", about = "Intercepting HTTP/HTTPS forward proxy for observing API traffic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the proxy listener.
    Serve(ServeArgs),

    /// Manage the root certificate authority.
    Cert {
        #[command(subcommand)]
        action: CertCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Serve(args) => args.run().await,
        Command::Cert { action } => action.execute(),
    };

    if let Err(e) = result {
        eprintln!("roo-sniffer: {}", e);
        std::process::exit(1);
    }
}
