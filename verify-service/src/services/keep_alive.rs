use reqwest::Client;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Periodically GET the service's own status page so idle hosts keep it up.
///
/// The first ping happens one full interval after start. Abort the returned
/// handle to stop.
pub fn spawn_keep_alive(client: Client, url: String, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            ping(&client, &url).await;
        }
    })
}

async fn ping(client: &Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!("Keep-alive ping successful");
            true
        }
        Ok(response) => {
            tracing::warn!(status = %response.status(), "Keep-alive ping failed");
            false
        }
        Err(e) => {
            tracing::warn!(error = %e, "Keep-alive ping failed");
            false
        }
    }
}
