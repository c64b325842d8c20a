use anyhow::{Context, Result};
use slipo::{CancellationToken, Client, PollPolicy, Status, TransformParameters};
use std::path::Path;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configure authentication via env vars or a `.slipoapirc` file.
    let client = Client::from_env()?;

    client
        .files()
        .upload_file(Path::new("pois.csv"), "demo/pois.csv", true)
        .context("uploading pois.csv")?;

    let mut params = TransformParameters::csv("demo/pois.csv", "OSM");
    params.configuration.delimiter = Some(";".into());
    params.configuration.attr_x = Some("lon".into());
    params.configuration.attr_y = Some("lat".into());
    let job = client.operations().transform(params)?;

    // Ctrl-C style cancellation would call `cancel.cancel()` from another thread.
    let cancel = CancellationToken::new();
    let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(15 * 60))
        .with_backoff(Duration::from_secs(30));
    let job = client.wait_for_operation(&job, policy, &cancel)?;

    match (job.status, &job.output) {
        (Status::Completed, Some(output)) => {
            let target = client
                .processes()
                .download_file_to(job.reference(), output.id, Path::new("pois.nt"))?;
            println!("saved {}", target.display());
        }
        (status, _) => anyhow::bail!("{} ended with status {}", job.reference(), status),
    }
    Ok(())
}
