use std::error::Error;
use std::io::{self, Write};

use goofish_scraper_rs::{HarvestConfig, HarvestConfigBuilder, Harvester, ProxyCredentials, VERSION};
use tokio::runtime::Runtime;

fn prompt(label: &str) -> io::Result<String> {
    print!("{} ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn parse_bool(input: &str, default: bool) -> bool {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => true,
        "n" | "no" | "false" => false,
        _ => default,
    }
}

fn parse_u32(input: &str, default: u32) -> u32 {
    input.trim().parse().ok().filter(|value| *value > 0).unwrap_or(default)
}

#[test]
#[ignore = "Requires network access, Chromium and manual input"]
fn interactive_live_scrape() -> Result<(), Box<dyn Error>> {
    println!("goofish-scraper-rs {} interactive smoke test", VERSION);
    println!("Provide inputs when prompted. Press Enter to accept defaults.\n");

    let url_input = prompt("Item URL [https://www.goofish.com/item?id=995598771021]:")?;
    let item_url = if url_input.is_empty() {
        "https://www.goofish.com/item?id=995598771021".to_string()
    } else {
        url_input
    };

    let proxy_host = prompt("Proxy host:port (blank for direct):")?;
    let proxy_user = prompt("Proxy user:")?;
    let proxy_pass = prompt("Proxy password:")?;
    let headed_answer = prompt("Show the browser window? (y/N):")?;
    let retries_answer = prompt("Max retries [2]:")?;

    let env_config = HarvestConfig::from_env()?;
    let mut builder = HarvestConfigBuilder::from_config(env_config)
        .with_headless(!parse_bool(&headed_answer, false))
        .with_max_retries(parse_u32(&retries_answer, 2));
    if !proxy_host.is_empty() {
        builder = builder.with_proxy(ProxyCredentials::new(proxy_user, proxy_pass, proxy_host));
    }

    let harvester = Harvester::builder().with_config(builder.build()?).build()?;
    let runtime = Runtime::new()?;

    println!("\nScraping {}...", item_url);
    let report = runtime.block_on(harvester.scrape(&item_url));
    println!("{}", serde_json::to_string_pretty(&report.to_json())?);

    let global = harvester.metrics().snapshot().global;
    println!(
        "Attempts: {}, blocked: {}, rotations: {}, sessions: {}",
        global.attempts, global.blocked, global.rotations, global.sessions
    );

    println!("Interactive test complete. Re-run with different inputs as needed.");
    Ok(())
}
