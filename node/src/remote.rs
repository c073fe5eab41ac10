//! # Remote commands
//!
//! `enroll` and `call` run the client side against a live server over
//! [`HttpTransport`], using a key file written by `keygen`.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use cipherpost_protocol::{Client, HttpTransport, PrivateKey, ProtocolConfig, PublicKey};

use crate::cli::{CallArgs, EnrollArgs, RemoteArgs};

/// Reads a key file, decrypting it if a passphrase is given.
pub fn load_key(path: &Path, passphrase: Option<&str>) -> Result<PrivateKey> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    PrivateKey::deserialize(text.trim(), passphrase)
        .with_context(|| format!("failed to load key from {}", path.display()))
}

fn connect(remote: &RemoteArgs) -> Result<(HttpTransport, PrivateKey)> {
    let key = load_key(&remote.key, remote.passphrase.as_deref())?;
    let transport =
        HttpTransport::with_timeout(remote.server.as_str(), Duration::from_secs(remote.timeout_secs))
            .context("failed to build HTTP client")?;
    Ok((transport, key))
}

async fn enroll_key(args: &EnrollArgs) -> Result<PublicKey> {
    let (transport, key) = connect(&args.remote)?;
    transport
        .enroll(&key.public())
        .await
        .with_context(|| format!("enrollment with {} failed", transport.base_url()))
}

async fn call_reply(args: &CallArgs) -> Result<serde_json::Value> {
    let server = PublicKey::from_id(args.server_key.trim()).context("invalid --server-key")?;
    let payload: serde_json::Value =
        serde_json::from_str(&args.payload).context("payload is not valid JSON")?;
    let (transport, key) = connect(&args.remote)?;
    let client = Client::new(transport, key, server, ProtocolConfig::default());
    client
        .call(&args.name, &payload)
        .await
        .with_context(|| format!("{} failed", args.name))
}

/// Prints the server key dedicated to this client.
pub async fn enroll(args: EnrollArgs) -> Result<()> {
    let server = enroll_key(&args).await?;
    println!("{}", server);
    Ok(())
}

/// Prints the reply payload as pretty JSON.
pub async fn call(args: CallArgs) -> Result<()> {
    let reply = call_reply(&args).await?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use cipherpost_protocol::client::ExchangeError;
    use cipherpost_protocol::envelope::codes as envelope_codes;

    use crate::api::{self, AppState};
    use crate::handlers::{EmailReply, EmailRequest, EMAIL_CREATE, EMAIL_FETCH};
    use crate::metrics::NodeMetrics;

    /// Serves a fresh node on an ephemeral loopback port.
    async fn serve() -> String {
        let metrics = Arc::new(NodeMetrics::new().unwrap());
        let state = AppState::new(ProtocolConfig::default(), metrics).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, api::create_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn key_file(key: &PrivateKey, passphrase: Option<&str>) -> PathBuf {
        let path = std::env::temp_dir().join(format!("cipherpost-remote-{}", uuid::Uuid::new_v4()));
        crate::write_private(&path, &key.serialize(passphrase).unwrap()).unwrap();
        path
    }

    fn remote(server: &str, key: &Path, passphrase: Option<&str>) -> RemoteArgs {
        RemoteArgs {
            server: server.to_string(),
            key: key.to_path_buf(),
            passphrase: passphrase.map(str::to_string),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn http_client_round_trip() {
        let base = serve().await;
        let transport = HttpTransport::new(format!("{base}/")).unwrap();
        let key = PrivateKey::generate();
        let server = transport.enroll(&key.public()).await.unwrap();

        let client = Client::new(transport, key.clone(), server, ProtocolConfig::default());
        let created: EmailReply = client
            .call(
                EMAIL_CREATE,
                &EmailRequest {
                    email: "erin@example.com".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(created.email, "erin@example.com");
        assert!(!created.validated);

        let err = client
            .transport()
            .enroll(&key.public())
            .await
            .unwrap_err();
        match err {
            ExchangeError::Rejected { status, error } => {
                assert_eq!(status, 409);
                assert_eq!(error.code, api::codes::USER_EXISTS);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn http_client_sees_plaintext_rejection() {
        let base = serve().await;
        let stranger = PrivateKey::generate();
        let client = Client::new(
            HttpTransport::new(base).unwrap(),
            stranger,
            PrivateKey::generate().public(),
            ProtocolConfig::default(),
        );
        let err = client
            .call::<_, serde_json::Value>(EMAIL_FETCH, &serde_json::json!({"email": "a@b.co"}))
            .await
            .unwrap_err();
        match err {
            ExchangeError::Rejected { status, error } => {
                assert_eq!(status, 401);
                assert_eq!(error.code, envelope_codes::UNKNOWN_SENDER);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn enroll_then_call_from_key_file() {
        let base = serve().await;
        let path = key_file(&PrivateKey::generate(), Some("hunter2"));

        let server = enroll_key(&EnrollArgs {
            remote: remote(&base, &path, Some("hunter2")),
        })
        .await
        .unwrap();

        let reply = call_reply(&CallArgs {
            remote: remote(&base, &path, Some("hunter2")),
            server_key: server.to_id(),
            name: EMAIL_CREATE.to_string(),
            payload: r#"{"email":"frank@example.com"}"#.to_string(),
        })
        .await
        .unwrap();
        assert_eq!(reply["email"], "frank@example.com");
        assert_eq!(reply["validated"], false);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn call_rejects_bad_payload_before_connecting() {
        let path = key_file(&PrivateKey::generate(), None);
        let err = call_reply(&CallArgs {
            remote: remote("http://127.0.0.1:9", &path, None),
            server_key: PrivateKey::generate().public().to_id(),
            name: EMAIL_FETCH.to_string(),
            payload: "{not json".to_string(),
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("payload is not valid JSON"));
        std::fs::remove_file(&path).unwrap();
    }
}
