use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "mien", about = "Mien facial-identity service CLI")]
struct Cli {
    /// Base URL of the miend service
    #[arg(long, default_value = "http://127.0.0.1:7600")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a patient's face under an MRN
    Enroll {
        /// Medical record number to register
        mrn: String,
        /// Path to the face image
        image: PathBuf,
    },
    /// Look up the patient matching a face image
    Search {
        /// Path to the face image
        image: PathBuf,
        /// Treat an unknown face as an error instead of a soft miss
        #[arg(long)]
        strict: bool,
    },
    /// Show service health
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Enroll { mrn, image } => {
            let payload = json!({ "mrn": mrn, "base64_image": encode_image(&image)? });
            let response = client
                .post(format!("{}/register_patient", cli.url))
                .json(&payload)
                .send()
                .await
                .context("request failed — is miend running?")?;

            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                bail_on_error(status.as_u16(), &body);
            }
            println!("registered {}", body["mrn"].as_str().unwrap_or(&mrn));
        }
        Commands::Search { image, strict } => {
            let payload = json!({ "base64_image": encode_image(&image)?, "strict": strict });
            let response = client
                .post(format!("{}/search_patient", cli.url))
                .json(&payload)
                .send()
                .await
                .context("request failed — is miend running?")?;

            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                bail_on_error(status.as_u16(), &body);
            }
            if body["matched"].as_bool().unwrap_or(false) {
                println!("matched {}", body["mrn"].as_str().unwrap_or("?"));
            } else {
                println!(
                    "no match ({})",
                    body["reason"].as_str().unwrap_or("no_similar_face")
                );
            }
        }
        Commands::Status => {
            let response = client
                .get(format!("{}/health", cli.url))
                .send()
                .await
                .context("request failed — is miend running?")?;
            let body: Value = response.json().await.context("malformed health response")?;
            println!(
                "miend {}: {} (up {}s)",
                body["version"].as_str().unwrap_or("?"),
                body["status"].as_str().unwrap_or("?"),
                body["uptime_seconds"].as_u64().unwrap_or(0)
            );
        }
    }

    Ok(())
}

/// Read an image file and base64-encode it for the request payload.
fn encode_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Surface the service's typed error envelope as a CLI failure.
fn bail_on_error(status: u16, body: &Value) -> ! {
    let code = body["error"]["code"].as_str().unwrap_or("UNKNOWN");
    let message = body["error"]["message"].as_str().unwrap_or("no details");
    eprintln!("error ({status} {code}): {message}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_image_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let encoded = encode_image(&path).unwrap();
        let decoded =
            base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_image_missing_file() {
        let err = encode_image(Path::new("/nonexistent/face.png")).unwrap_err();
        assert!(err.to_string().contains("failed to read image"));
    }
}
