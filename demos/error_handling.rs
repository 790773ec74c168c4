use iec60870::iec104::{Client, ClientConfig};
use iec60870::{IecError, IecResult};
use std::error::Error;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Shows the error-handling patterns this crate is built around:
/// `?`-propagation, matching on specific [`IecError`] variants, and
/// using [`IecError::is_fatal`] to decide whether to retry or bail.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    println!("basic propagation with ?");
    match connect_and_start("127.0.0.1", 2404).await {
        Ok(_) => println!("connected"),
        Err(e) => println!("error: {e}"),
    }

    println!("\nmatching specific variants");
    match connect_with_retry("127.0.0.1", 2404).await {
        Ok(_) => println!("connected"),
        Err(IecError::ConnectionFailed(reason)) => println!("connection failed: {reason}"),
        Err(IecError::Timeout(reason)) => println!("timed out: {reason}"),
        Err(e) => println!("other error: {e}"),
    }

    println!("\ndeciding whether to retry with is_fatal");
    if let Err(e) = connect_and_start("127.0.0.1", 2404).await {
        if e.is_fatal() {
            println!("fatal, not retrying: {e}");
        } else {
            println!("non-fatal, could retry: {e}");
        }
    }

    Ok(())
}

async fn connect_and_start(host: &str, port: u16) -> IecResult<()> {
    let config = ClientConfig::default().with_address(host, port);
    let client = Client::connect(config).await?;
    client.start_dt().await?;
    Ok(())
}

async fn connect_with_retry(host: &str, port: u16) -> IecResult<()> {
    let short_timeout = ClientConfig::default().with_address(host, port);
    match Client::connect(short_timeout).await {
        Ok(client) => {
            client.start_dt().await?;
            Ok(())
        }
        Err(IecError::ConnectionFailed(reason)) => {
            println!("first attempt failed ({reason}), retrying once");
            let config = ClientConfig::default().with_address(host, port);
            tokio::time::sleep(Duration::from_millis(200)).await;
            let client = Client::connect(config).await?;
            client.start_dt().await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}
