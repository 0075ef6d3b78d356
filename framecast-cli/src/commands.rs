//! Command implementations.

use colored::Colorize;
use framecast_cipher::legacy::{PrivateKey, PublicKey};
use framecast_client::{Client, ClientError};
use num_bigint::BigUint;
use rand_core::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use std::io::Write;

/// How received frames are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Raw decrypted bytes.
    Raw,
    /// One hex-encoded line per frame.
    Hex,
    /// One summary line per frame.
    Summary,
}

/// A freshly generated legacy key pair, as decimal strings.
#[derive(Debug, Clone)]
pub struct GeneratedKeys {
    pub modulus: BigUint,
    pub public_exponent: BigUint,
    pub private_exponent: BigUint,
}

/// Generates an RSA key pair for the legacy key exchange.
pub fn keygen(bits: usize) -> Result<GeneratedKeys, rsa::Error> {
    let key = RsaPrivateKey::new(&mut OsRng, bits)?;
    Ok(GeneratedKeys {
        modulus: BigUint::from_bytes_le(&key.n().to_bytes_le()),
        public_exponent: BigUint::from_bytes_le(&key.e().to_bytes_le()),
        private_exponent: BigUint::from_bytes_le(&key.d().to_bytes_le()),
    })
}

/// Parses decimal legacy key components into a key pair.
pub fn parse_legacy_keys(
    modulus: &str,
    public_exponent: &str,
    private_exponent: &str,
) -> Result<(PublicKey, PrivateKey), String> {
    let parse = |name: &str, value: &str| {
        value
            .trim()
            .parse::<BigUint>()
            .map_err(|e| format!("invalid {}: {}", name, e))
    };
    let n = parse("modulus", modulus)?;
    let e = parse("public exponent", public_exponent)?;
    let d = parse("private exponent", private_exponent)?;

    let public = PublicKey::new(e, n.clone()).map_err(|e| e.to_string())?;
    let private = PrivateKey::new(d, n).map_err(|e| e.to_string())?;
    Ok((public, private))
}

/// Writes one received frame in the requested format.
pub fn write_frame(
    out: &mut impl Write,
    seq: u64,
    frame: &[u8],
    format: OutputFormat,
) -> std::io::Result<()> {
    match format {
        OutputFormat::Raw => out.write_all(frame)?,
        OutputFormat::Hex => writeln!(out, "{}", hex::encode(frame))?,
        OutputFormat::Summary => {
            let preview_len = frame.len().min(16);
            writeln!(
                out,
                "#{} {} bytes {}",
                seq,
                frame.len(),
                hex::encode(&frame[..preview_len])
            )?;
        }
    }
    out.flush()
}

/// Receives frames until `count` frames arrive, the stream ends, or Ctrl+C.
///
/// Returns the number of frames received.
pub async fn receive(
    client: &Client,
    count: Option<u64>,
    format: OutputFormat,
) -> Result<u64, ClientError> {
    let mut received = 0u64;
    let stdout = std::io::stdout();

    loop {
        if count.is_some_and(|limit| received >= limit) {
            break;
        }

        tokio::select! {
            frame = client.recv() => {
                match frame {
                    Ok(frame) => {
                        received += 1;
                        let mut out = stdout.lock();
                        write_frame(&mut out, received, &frame, format)?;
                    }
                    Err(ClientError::ConnectionClosed) => {
                        eprintln!("{}", "Server closed the stream".yellow());
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping...".dimmed());
                break;
            }
        }
    }

    Ok(received)
}
