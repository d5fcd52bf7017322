//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "snapbeam",
    version,
    about = "Send photos and files to a paired desktop over the local network"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Listen for transfers and show the pairing QR code.
    Receive {
        /// Transfer port.
        #[arg(long)]
        port: Option<u16>,
        /// Pairing port advertised in the QR code.
        #[arg(long)]
        pairing_port: Option<u16>,
        /// Directory received files are written to.
        #[arg(long, value_name = "DIR")]
        save_dir: Option<PathBuf>,
    },
    /// Pair with a receiver using the JSON text from its QR code.
    Pair {
        #[arg(value_name = "QR_JSON")]
        qr: String,
    },
    /// Send files to a paired receiver.
    Send {
        /// Session id; defaults to the most recently paired session.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// List saved sessions.
    Sessions {
        /// Forget the session with this id instead of listing.
        #[arg(long, value_name = "ID")]
        forget: Option<String>,
    },
}

impl Cli {
    /// Applies flag overrides on top of the loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Command::Receive {
            port,
            pairing_port,
            save_dir,
        } = &self.command
        {
            if let Some(port) = port {
                config.transfer_port = *port;
            }
            if let Some(port) = pairing_port {
                config.pairing_port = *port;
            }
            if let Some(dir) = save_dir {
                config.save_dir = dir.to_string_lossy().into_owned();
            }
        }
    }
}
