use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, name = "madns", about = "DNS responder for redirect, static and rebind answers")]
pub struct Args {
    /// madns JSON config file
    #[arg(short('c'), long, value_name = "PATH", default_value = "madns-config.json")]
    pub config: PathBuf,
    #[arg(long, value_name = "ADDR", default_value = "0.0.0.0")]
    pub host: IpAddr,
    /// Overrides the `Port` value of the config file
    #[arg(short('p'), long, value_name = "PORT")]
    pub port: Option<u16>,
}
