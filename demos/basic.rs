use resilient_http::{ClientFactory, ResilienceOptions, TimeoutPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("TARGET_URL").unwrap_or_else(|_| "https://example.com/".to_owned());

    let opts = ResilienceOptions::from_env()?;
    let timeout = opts.timeout_policy()?;
    let retry = opts.retry_policy()?;

    println!("timeout: {timeout} ({:?})", timeout.effective());
    println!(
        "retries: {} (backoff factor {})",
        retry.total_attempts(),
        retry.backoff_factor()
    );

    let client = ClientFactory::build(None, retry, timeout)?;

    let response = client.get(&url).send().await?;
    println!("{} -> {}", url, response.status());

    // Tighter budget for a single call.
    let quick = TimeoutPolicy::from_read(5.0)?.with_coefficient(0.7)?;
    let response = client.get(&url).timeout(quick).send().await?;
    println!("{} (read {:?}s) -> {}", url, quick.read(), response.status());

    Ok(())
}
