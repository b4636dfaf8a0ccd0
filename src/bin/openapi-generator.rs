//! Print the OpenAPI document of the voice ledger API to stdout.

use anyhow::Context;
use utoipa::OpenApi;
use voice_ledger::services::documentation::ApiDoc;

fn main() -> anyhow::Result<()> {
    let doc = ApiDoc::openapi()
        .to_pretty_json()
        .context("serializing OpenAPI document")?;
    println!("{doc}");
    Ok(())
}
