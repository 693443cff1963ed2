use anyhow::{anyhow, Context};
use int_probe::config::{Config, CONFIG_FILE};
use int_probe::peer::{self, SELF_CHECK_VALUES};
use tokio::net::TcpListener;

const SELF_CHECK_FLAG: &str = "--self-check";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::new(CONFIG_FILE).context("Error loading config")?;
    config.init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some(SELF_CHECK_FLAG) => {
            let count = match args.get(1) {
                Some(count) => count
                    .parse()
                    .with_context(|| format!("Invalid value count {:?}", count))?,
                None => SELF_CHECK_VALUES,
            };
            self_check(&config, count).await
        }
        Some(other) => Err(anyhow!(
            "Unknown argument {:?}, expected nothing or {} [count]",
            other,
            SELF_CHECK_FLAG
        )),
        None => serve(&config).await,
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Error binding {}", config.bind_addr()))?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(_) => tracing::debug!("Tokio's ctrl_c signal received"),
            Err(err) => {
                // If the OS fails to register the signal we can't react to it, so
                // we print the error and keep serving until we are killed.
                tracing::debug!("{}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    peer::serve(listener, config.max_clients, shutdown).await
}

// We host the peer in this same process, on a port picked by the OS, and then
// act as its client. The listener is bound before the server task starts, so
// the client can connect right away.
async fn self_check(config: &Config, count: u64) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.bind_host.as_str(), 0))
        .await
        .with_context(|| format!("Error binding {}:0", config.bind_host))?;
    let addr = listener.local_addr()?;
    tokio::spawn(peer::serve(
        listener,
        config.max_clients,
        std::future::pending(),
    ));

    let report = peer::check(addr, count, &mut std::io::stdout()).await?;
    match report.short_read {
        Some(got) => Err(anyhow!(
            "Peer closed after {} values with a {} byte response",
            report.checked,
            got
        )),
        None => Ok(()),
    }
}
