use anyhow::{Context, Result};
use colored::*;
use pulsegate::Config;
use reqwest::Client;
use std::time::Instant;

/// Endpoints the pipeline polls, with the label doctor prints for each.
const ENDPOINTS: &[(&str, &str)] = &[
    ("Resources", "/resources"),
    ("Processes", "/processes"),
    ("Logs", "/logs"),
    ("Uptime", "/metrics"),
    ("Database", "/db-health"),
    ("Analysis history", "/analysis-history"),
    ("User prompts", "/user-prompts"),
    ("Health", "/health"),
];

pub async fn run_doctor(config: Config) -> Result<()> {
    println!("{}", "pulsegate doctor".bold().cyan());
    println!("{}", format!("Backend: {}", config.backend.base_url).dimmed());
    println!();

    let client = Client::builder()
        .timeout(config.polling.fetch_timeout())
        .build()
        .context("failed to build HTTP client")?;
    let mut failures = 0;

    for (label, path) in ENDPOINTS {
        print!("• {:<18}", format!("{label}:"));
        let mut request = client.get(config.backend.endpoint(path));
        if let Some(token) = &config.backend.token {
            request = request.bearer_auth(token);
        }
        let started = Instant::now();
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                let ms = started.elapsed().as_millis();
                println!("{}", format!("OK ({ms} ms)").green());
            }
            Ok(resp) => {
                println!("{}", format!("FAIL (Status {})", resp.status()).red());
                failures += 1;
            }
            Err(e) => {
                println!("{}", format!("FAIL ({e})").red());
                failures += 1;
            }
        }
    }

    print!("• {:<18}", "Live stream:");
    let mut request = client
        .get(config.backend.stream_url())
        .header("accept", "text/event-stream");
    if let Some(token) = &config.backend.token {
        request = request.query(&[("token", token)]);
    }
    match request.send().await {
        Ok(resp) if resp.status().is_success() => {
            let is_sse = resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("text/event-stream"));
            if is_sse {
                println!("{}", "OK".green());
            } else {
                println!("{}", "OK (not text/event-stream)".yellow());
            }
        }
        Ok(resp) => {
            println!("{}", format!("FAIL (Status {})", resp.status()).red());
            println!("  → Dashboard will fall back to polling every {:?}", config.polling.fallback_interval());
            failures += 1;
        }
        Err(e) => {
            println!("{}", format!("FAIL ({e})").red());
            failures += 1;
        }
    }

    println!();
    print!("• {:<18}", "Pipeline cycle:");
    match crate::first_view(config).await {
        Ok(view) => {
            let m = view.metrics;
            let summary = format!(
                "{} polls, {} fetch failures, {} stream errors",
                m.polls_total, m.fetch_failures, m.stream_errors
            );
            if view.banner.is_some() {
                println!("{}", format!("FAIL ({summary})").red());
                failures += 1;
            } else if m.fetch_failures > 0 {
                println!("{}", format!("DEGRADED ({summary})").yellow());
            } else {
                println!("{}", format!("OK ({summary})").green());
            }
        }
        Err(e) => {
            println!("{}", format!("FAIL ({e:#})").red());
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("{}", "Backend is reachable and healthy.".bold().green());
    } else {
        println!(
            "{}",
            format!("{failures} check(s) failed. See above.").bold().yellow()
        );
    }

    Ok(())
}
