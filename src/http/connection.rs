use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use crate::http::parser::{parse_http_request, ParseError};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::router::Router;

pub struct Connection {
    stream: TcpStream,
    buffer: Vec<u8>,
    state: ConnectionState,
    router: Arc<Router>,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

impl Connection {
    pub fn new(stream: TcpStream, router: Arc<Router>) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            router,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await {
                    Ok(Some(req)) => ConnectionState::Processing(req),
                    Ok(None) => ConnectionState::Closed,
                    Err(e) => {
                        // answer malformed input once, then hang up
                        let mut writer = ResponseWriter::new(&Response::bad_request());
                        writer.write_to_stream(&mut self.stream).await?;
                        return Err(e);
                    }
                },

                ConnectionState::Processing(req) => self.process(req).await,

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        loop {
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => {
                    return Err(anyhow::anyhow!("HTTP parse error: {:?}", e));
                }
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                // Client closed connection
                return Ok(None);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }

    /// Route one request. Upgrades hand the socket to the tunnel and end
    /// the request/response loop.
    async fn process(&mut self, req: Request) -> ConnectionState {
        let router = Arc::clone(&self.router);
        let keep_alive = req.keep_alive();

        if let Some(route) = router.route(&req.path).filter(|route| route.tunnels(&req)) {
            let buffered = std::mem::take(&mut self.buffer);
            route
                .handler()
                .tunnel(&mut self.stream, &req, &buffered)
                .await;
            return ConnectionState::Closed;
        }

        let response = match router.forward(&req).await {
            Some(response) => response,
            None => {
                tracing::debug!(path = %req.path, "Not proxied");
                Response::not_found()
            }
        };

        ConnectionState::Writing(ResponseWriter::new(&response), keep_alive)
    }
}
