//! WebSocket tunnelling
//!
//! After the handshake is relayed the proxy stops interpreting bytes and
//! copies both directions until either side closes.

use crate::http::request::Request;
use crate::http::writer::ResponseWriter;
use crate::proxy::error::ProxyError;
use crate::proxy::upstream::{error_response, ProxyHandler};
use tokio::io::{copy_bidirectional, AsyncWriteExt};
use tokio::net::TcpStream;

impl ProxyHandler {
    /// Relay an upgrade request to the backend and then pipe raw bytes.
    ///
    /// `buffered` holds client bytes read past the end of the handshake.
    /// A failed connect answers the client with a gateway error; a failure
    /// mid-stream just ends the tunnel. Both are emitted to the error
    /// listeners.
    pub async fn tunnel(&self, client: &mut TcpStream, request: &Request, buffered: &[u8]) {
        let mut backend = match self.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                self.events().emit_error(&e);
                let mut writer = ResponseWriter::new(&error_response(&e));
                if let Err(write_err) = writer.write_to_stream(client).await {
                    tracing::debug!(error = %write_err, "client went away before gateway error");
                }
                return;
            }
        };

        let handshake = self.build_upgrade_request(request);
        if let Err(e) = send_handshake(&mut backend, &handshake, buffered).await {
            self.events().emit_error(&ProxyError::from(e));
            return;
        }

        tracing::debug!(target_url = %self.target(), path = %request.path, "WebSocket tunnel open");

        match copy_bidirectional(client, &mut backend).await {
            Ok((to_backend, to_client)) => {
                tracing::debug!(
                    target_url = %self.target(),
                    to_backend,
                    to_client,
                    "WebSocket tunnel closed"
                );
            }
            Err(e) => self.events().emit_error(&ProxyError::from(e)),
        }
    }
}

async fn send_handshake(
    backend: &mut TcpStream,
    handshake: &[u8],
    buffered: &[u8],
) -> std::io::Result<()> {
    backend.write_all(handshake).await?;
    if !buffered.is_empty() {
        backend.write_all(buffered).await?;
    }
    backend.flush().await
}
