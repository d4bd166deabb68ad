//! One-shot configuration exchange preceding the first turn.
//!
//! The literal request and readiness strings are wire constants inherited
//! from the original deployment; they are compared byte for byte and any
//! deviation aborts the session.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::DebateError;
use crate::protocol::Connection;

/// Sent by the connecting side to request initialization.
pub const INIT_REQUEST: &str = "Iniciame";

/// Sent by the connecting side once the configuration is stored.
pub const READY_CONFIRMATION: &str = "Estoy listo";

/// Human-readable welcome; carried in the reply, never compared.
pub const WELCOME_MESSAGE: &str = "Bienvenido al servidor";

/// The single bootstrap reply: a welcome line plus the connecting side's
/// configuration subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapReply {
    pub message: String,
    pub configuration: RemoteConfig,
}

fn literal_mismatch(expected: &str, actual: &[u8]) -> DebateError {
    DebateError::Protocol {
        expected: expected.to_string(),
        actual: String::from_utf8_lossy(actual).into_owned(),
    }
}

/// Accepting side: wait for the initiation literal, send the
/// configuration, wait for readiness.
pub async fn accept_handshake<S>(
    conn: &mut Connection<S>,
    configuration: RemoteConfig,
) -> Result<(), DebateError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = conn.recv_bytes().await?;
    if request != INIT_REQUEST.as_bytes() {
        return Err(literal_mismatch(INIT_REQUEST, &request));
    }
    debug!("initiation request received");

    let reply = BootstrapReply {
        message: WELCOME_MESSAGE.to_string(),
        configuration,
    };
    let payload =
        serde_json::to_vec(&reply).map_err(|e| DebateError::PayloadDecode(e.to_string()))?;
    conn.send_bytes(&payload).await?;

    let ready = conn.recv_bytes().await?;
    if ready != READY_CONFIRMATION.as_bytes() {
        return Err(literal_mismatch(READY_CONFIRMATION, &ready));
    }
    debug!("peer ready, bootstrap complete");
    Ok(())
}

/// Connecting side: send the initiation literal, receive the
/// configuration, confirm readiness.
pub async fn connect_handshake<S>(conn: &mut Connection<S>) -> Result<BootstrapReply, DebateError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send_bytes(INIT_REQUEST.as_bytes()).await?;
    let raw = conn.recv_bytes().await?;
    let reply: BootstrapReply =
        serde_json::from_slice(&raw).map_err(|e| DebateError::PayloadDecode(e.to_string()))?;
    conn.send_bytes(READY_CONFIRMATION.as_bytes()).await?;
    debug!(starting_model = reply.configuration.starting_model, "configuration received");
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SamplingParams, SessionConfig, Side, SideConfig};

    fn test_remote() -> RemoteConfig {
        SessionConfig {
            topic: "tea or coffee".to_string(),
            server: SideConfig {
                model: "model-a".to_string(),
                opinion: "tea".to_string(),
                persona: String::new(),
                name: Some("Aria".to_string()),
            },
            client: SideConfig {
                model: "model-b".to_string(),
                opinion: "coffee".to_string(),
                persona: String::new(),
                name: Some("Bruno".to_string()),
            },
            starting_side: Side::Server,
            winner: None,
            budget: 5,
            convince_time: 2,
            convince_time_definitive: 1,
            sampling: SamplingParams::default(),
        }
        .remote_config()
    }

    #[tokio::test]
    async fn handshake_exchanges_configuration() {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let mut server_conn = Connection::new(server_io);
        let mut client_conn = Connection::new(client_io);

        let (accepted, reply) = tokio::join!(
            accept_handshake(&mut server_conn, test_remote()),
            connect_handshake(&mut client_conn),
        );
        accepted.unwrap();
        let reply = reply.unwrap();
        assert_eq!(reply.message, WELCOME_MESSAGE);
        assert_eq!(reply.configuration.model, "model-b");
        assert_eq!(reply.configuration.conversation_length, 5);
    }

    #[tokio::test]
    async fn wrong_initiation_literal_is_fatal() {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let mut server_conn = Connection::new(server_io);
        let mut client_conn = Connection::new(client_io);

        let (sent, accepted) = tokio::join!(
            client_conn.send_bytes(b"Hola"),
            accept_handshake(&mut server_conn, test_remote()),
        );
        sent.unwrap();
        let err = accepted.unwrap_err();
        match err {
            DebateError::Protocol { expected, actual } => {
                assert_eq!(expected, INIT_REQUEST);
                assert_eq!(actual, "Hola");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_readiness_literal_is_fatal() {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let mut server_conn = Connection::new(server_io);
        let mut client_conn = Connection::new(client_io);

        let client = async {
            client_conn.send_bytes(INIT_REQUEST.as_bytes()).await?;
            let _reply = client_conn.recv_bytes().await?;
            client_conn.send_bytes(b"Ready").await
        };
        let (client_result, accepted) =
            tokio::join!(client, accept_handshake(&mut server_conn, test_remote()));
        client_result.unwrap();
        assert!(matches!(
            accepted.unwrap_err(),
            DebateError::Protocol { .. }
        ));
    }
}
