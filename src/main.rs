//! D365 S2S sample
//!
//! Creates an account and a contact with app-only credentials, then reads
//! each record back through the URI returned by the Web API.

use anyhow::{Context, Result};
use d365_s2s::config::Config;
use d365_s2s::odata::ODataClient;
use serde_json::{json, Value};
use std::io;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, records to stdout
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = Config::load_default().context("loading configuration")?;
    let runtime_config = config.to_runtime().context("validating configuration")?;

    tracing::info!("Using service root {}", runtime_config.service_root);

    let client = ODataClient::from_config(&runtime_config).context("building client")?;

    create_and_read(&client, "accounts", sample_account()).await?;
    create_and_read(&client, "contacts", sample_contact()).await?;

    Ok(())
}

async fn create_and_read(client: &ODataClient, entity_set: &str, record: Value) -> Result<()> {
    let uri = client
        .create(entity_set, &record)
        .await
        .with_context(|| format!("creating record in {}", entity_set))?;

    println!("Created {}", uri);

    let stored = client
        .read(uri.as_str(), None)
        .await
        .with_context(|| format!("reading {}", uri))?;

    match stored {
        Some(body) => println!("{}", serde_json::to_string_pretty(&body)?),
        None => println!("{} not modified", uri),
    }

    Ok(())
}

fn sample_account() -> Value {
    json!({
        "name": "WEB MARKETING",
        "crm_pravnioblik": 400000000,
        "crm_oib": "25065980939",
        "crm_mb": "02085429",
        "crm_sifradjelatnosti": "6201",
        "address1_city": "Zagreb",
        "address1_line1": "Medarska 56b",
        "address1_postofficebox": "10090",
        "telephone1": "3817-757",
        "fax": "3864-105",
        "websiteurl": "www.wem.hr",
        "crm_udruga_sifra": "033",
        "crm_brojdjelatnika": 10,
        "crm_regija@odata.bind": "/teams(353FC4D2-9EE6-E911-A829-000D3ABA5555)"
    })
}

fn sample_contact() -> Value {
    json!({
        "firstname": "Hrvoje",
        "lastname": "Nekić",
        "gendercode": 1,
        "jobtitle": "direktor",
        "telephone1": "013817757",
        "fax": "013864105",
        "mobilephone": "0912501660",
        "emailaddress1": "hrvoje@wem.hr",
        "address1_city": "Zagreb",
        "address1_line1": "Medarska 56b",
        "address1_postofficebox": "10090",
        "donotemail": false
    })
}
