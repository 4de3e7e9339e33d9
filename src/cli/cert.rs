//! `cert` subcommand: mint (or re-mint) the root CA, and inspect an
//! existing one's subject/validity without starting the proxy.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use tracing::info;
use x509_parser::prelude::*;

use crate::ca::{ca_paths, CertificateAuthority};
use crate::error::{Error, Result};

#[derive(Debug, Subcommand)]
pub enum CertCommand {
    /// Generate the root CA certificate and key, if one doesn't exist yet.
    Generate(GenerateArgs),

    /// Print the root CA's subject, validity window, and fingerprint.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Directory to write `roo-sniffer-ca.pem` / `roo-sniffer-ca-key.pem` to.
    #[arg(long, default_value = "./certs")]
    pub cert_dir: PathBuf,

    /// Overwrite an existing root CA instead of leaving it in place.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Directory holding the root CA cert/key.
    #[arg(long, default_value = "./certs")]
    pub cert_dir: PathBuf,
}

impl CertCommand {
    pub fn execute(&self) -> Result<()> {
        match self {
            CertCommand::Generate(args) => generate(args),
            CertCommand::Inspect(args) => inspect(args),
        }
    }
}

fn generate(args: &GenerateArgs) -> Result<()> {
    let (cert_path, key_path) = ca_paths(&args.cert_dir);

    if args.force {
        let _ = std::fs::remove_file(&cert_path);
        let _ = std::fs::remove_file(&key_path);
    } else if cert_path.exists() && key_path.exists() {
        info!("CA already exists at {}; pass --force to regenerate", cert_path.display());
        return Ok(());
    }

    let ca = CertificateAuthority::load_or_init(&args.cert_dir)?;
    info!("generated root CA at {}", ca.ca_cert_path().display());
    println!("{}", ca.ca_cert_path().display());
    Ok(())
}

fn inspect(args: &InspectArgs) -> Result<()> {
    let (cert_path, _) = ca_paths(&args.cert_dir);
    let pem = std::fs::read(&cert_path).map_err(Error::TransportError)?;
    let der = rustls_pemfile::certs(&mut pem.as_slice())
        .map_err(|e| Error::ParseError(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| Error::ParseError(format!("no certificate found in {}", cert_path.display())))?;

    let (_, parsed) = X509Certificate::from_der(&der).map_err(|e| Error::ParseError(e.to_string()))?;

    let subject = parsed.subject().to_string();
    let issuer = parsed.issuer().to_string();
    let not_before = parsed.validity().not_before;
    let not_after = parsed.validity().not_after;

    println!("Subject:     {}", subject);
    println!("Issuer:      {}", issuer);
    println!("Not before:  {}", not_before.to_string());
    println!("Not after:   {}", not_after.to_string());
    println!("Serial:      {}", parsed.raw_serial_as_string());
    println!("Path:        {}", cert_path.display());

    Ok(())
}
