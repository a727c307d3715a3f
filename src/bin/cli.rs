use anyhow::{Context, Result};
use filing_parser::{
    storage::Table, EdgarClient, FilingProcessor, InMemoryRecordStore, ParserConfig,
    ProcessResponse, RecordStore, RestRecordStore, TriggerEvent,
};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "filing-parser", about = "Locate, extract and store one SEC filing")]
struct Opt {
    /// Trigger payload file; read from stdin when omitted
    #[structopt(short, long, parse(from_os_str))]
    payload: Option<PathBuf>,

    /// Write records to an in-memory store and print them instead
    #[structopt(long)]
    dry_run: bool,
}

fn read_payload(path: Option<&PathBuf>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload from {:?}", path)),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("reading payload from stdin")?;
            Ok(raw)
        }
    }
}

/// Registers the trigger's filing so a dry run resolves a filing id.
fn dry_run_store(event: &TriggerEvent) -> InMemoryRecordStore {
    let row = json!({
        "id": event.filing_id.clone().unwrap_or_else(|| "dry-run".to_string()),
        "accession_number": event.accession_number,
    });
    InMemoryRecordStore::new()
        .with_rows(Table::FundFilings, vec![row.clone()])
        .with_rows(Table::CompanyFilings, vec![row])
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();
    let opt = Opt::from_args();

    let config = ParserConfig::from_env()?;
    let raw = read_payload(opt.payload.as_ref())?;
    let fetcher = Arc::new(EdgarClient::new(&config)?);

    let event = match TriggerEvent::from_json(&raw) {
        Ok(event) => event,
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&ProcessResponse::failure(&e))?);
            std::process::exit(1);
        }
    };

    let memory = Arc::new(dry_run_store(&event));
    let store: Arc<dyn RecordStore> = if opt.dry_run {
        memory.clone()
    } else {
        Arc::new(RestRecordStore::from_config(&config)?)
    };

    let processor = FilingProcessor::new(fetcher, store, config);
    let response = processor.process(event).await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if opt.dry_run {
        println!("{}", serde_json::to_string_pretty(&memory.snapshot())?);
    }

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
