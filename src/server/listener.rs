use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::proxy::router::Router;

/// Bind the dev server address from `cfg` and serve forever.
pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let router = Arc::new(Router::from_config(cfg)?);
    let listener = TcpListener::bind(cfg.server.bind_addr()).await?;
    info!(
        addr = %cfg.server.bind_addr(),
        rules = router.routes().len(),
        "Listening"
    );

    serve(listener, router).await
}

/// Accept loop; each connection runs as its own task and its failures stay
/// inside it.
pub async fn serve(listener: TcpListener, router: Arc<Router>) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!("Accepted connection from {}", peer);

        let router = Arc::clone(&router);
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, router);
            if let Err(e) = conn.run().await {
                tracing::warn!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
