#![forbid(unsafe_code)]

//! `cmdsock-ctl` — local CLI companion for `cmdsock`.
//!
//! Sends one command line to the server and prints every response line.
//! The protocol has no end-of-response marker, so the client stops reading
//! once the server closes the connection or stays silent for `--idle-ms`.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::time::Duration;

use clap::Parser;

use cmdsock::protocol::escape::encode_line;
use cmdsock::protocol::ERROR_PREFIX;
use cmdsock::Endpoint;

#[derive(Debug, Parser)]
#[command(
    name = "cmdsock-ctl",
    about = "Local CLI for the cmdsock command server",
    version,
    long_about = None
)]
struct Cli {
    /// Server address: a Unix socket path or a TCP `host:port` pair.
    #[arg(long, default_value = "cmdsock.sock")]
    address: String,

    /// Milliseconds of silence after which the response is considered complete.
    #[arg(long, default_value_t = 500)]
    idle_ms: u64,

    /// Command name.
    command: String,

    /// Command arguments; each is percent-encoded before sending.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

fn main() {
    let args = Cli::parse();

    let endpoint = match args.address.parse::<Endpoint>() {
        Ok(endpoint) => endpoint,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    };

    let mut tokens = Vec::with_capacity(args.args.len() + 1);
    tokens.push(args.command.clone());
    tokens.extend(args.args.iter().cloned());
    let line = encode_line(&tokens);

    match send_command(&endpoint, &line, Duration::from_millis(args.idle_ms)) {
        Ok(lines) => {
            let mut failed = false;
            for response in &lines {
                println!("{response}");
                failed |= response.starts_with(ERROR_PREFIX);
            }
            if failed {
                std::process::exit(1);
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to server: {err}");
            eprintln!("Is cmdsock listening on '{}'?", args.address);
            std::process::exit(1);
        }
    }
}

/// Connect to `endpoint`, send `line`, and collect response lines.
fn send_command(
    endpoint: &Endpoint,
    line: &str,
    idle: Duration,
) -> std::result::Result<Vec<String>, Box<dyn std::error::Error>> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port))?;
            stream.set_read_timeout(Some(idle))?;
            exchange(stream, line)
        }
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = UnixStream::connect(path)?;
            stream.set_read_timeout(Some(idle))?;
            exchange(stream, line)
        }
        #[cfg(not(unix))]
        Endpoint::Unix(path) => Err(format!(
            "unix sockets are unsupported on this platform: {}",
            path.display()
        )
        .into()),
    }
}

fn exchange<S: Read + Write>(
    mut stream: S,
    line: &str,
) -> std::result::Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut request = line.to_owned();
    request.push('\n');
    stream.write_all(request.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    loop {
        let mut buf = String::new();
        match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(_) => lines.push(buf.trim_end_matches(['\r', '\n']).to_owned()),
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if !buf.is_empty() {
                    lines.push(buf.trim_end_matches('\r').to_owned());
                }
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(lines)
}
