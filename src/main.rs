use devgate::config::Config;
use devgate::server;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stderr is the diagnostic stream; reported proxy errors land there
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    for (name, value) in cfg.defines() {
        tracing::debug!(%name, %value, "define");
    }
    tracing::debug!(
        out_dir = %cfg.build.out_dir.display(),
        assets = %cfg.build.assets_path().display(),
        ignored = ?cfg.watch.ignored,
        "Build layout"
    );

    tokio::select! {
        res = server::listener::run(&cfg) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
