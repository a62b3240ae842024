mod cli;
mod config;
mod download;
mod error;
mod export;
mod importer;
mod lists;
mod logging;
mod marketplace;
mod store;
mod tags;
mod types;
mod util;

use clap::Parser;

use cli::{Cli, Command};
use config::{ConfigOverrides, Settings};
use download::download_all;
use error::{ImportError, Result};
use export::export_snapshot;
use importer::{import_json_dir, import_sequential, prefetch_to_dir, print_progress, print_summary};
use lists::{dedupe_identifier_list, read_identifier_list, resolve_import_input};
use marketplace::MarketplaceClient;
use store::ExtensionStore;
use types::ExtensionIdentifier;

fn main() {
    // Usage errors exit 1; --help and --version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = logging::init(cli.verbose) {
        eprintln!("warning: could not initialise logging: {err}");
    }

    if let Err(err) = run(cli) {
        tracing::error!(kind = err.kind(), error = %err, "run aborted");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let workers = match &cli.command {
        Command::ImportJson { workers, .. } | Command::Fetch { workers, .. } => *workers,
        _ => None,
    };
    let overrides = ConfigOverrides {
        db_path: cli.db.clone(),
        workers,
    };
    let settings = Settings::from_environment(cli.config.as_deref(), &overrides)?;
    tracing::debug!(?settings, "resolved settings");

    match cli.command {
        Command::Import { input } => {
            let identifiers = resolve_import_input(&input)?;
            let store = ExtensionStore::open_or_create(&settings.db_path)?;
            let client = marketplace_client(&settings);
            println!("Importing into {}", settings.db_path.display());
            let summary = import_sequential(&client, &store, &identifiers, print_progress)?;
            print_summary(&summary.stats, Some(summary.stored_total));
            Ok(())
        }

        Command::ImportJson { dir, .. } => {
            let dir = dir.unwrap_or_else(|| settings.data_dir.clone());
            println!(
                "Importing {} into {} with {} workers",
                dir.display(),
                settings.db_path.display(),
                settings.workers
            );
            let summary = import_json_dir(&dir, &settings.db_path, settings.workers, print_progress)?;
            print_summary(&summary.stats, Some(summary.stored_total));
            Ok(())
        }

        Command::Fetch {
            mut identifiers,
            file,
            out,
            ..
        } => {
            if let Some(file) = file {
                let listed = read_identifier_list(&file)?;
                println!("Read {} extensions from {}", listed.len(), file.display());
                identifiers.extend(listed);
            }
            if identifiers.is_empty() {
                return Err(ImportError::Config("no extensions to fetch".into()));
            }
            let out = out.unwrap_or_else(|| settings.data_dir.clone());
            let client = marketplace_client(&settings);
            println!(
                "Fetching {} extensions with {} workers into {}",
                identifiers.len(),
                settings.workers,
                out.display()
            );
            let stats = prefetch_to_dir(&client, &identifiers, &out, settings.workers, print_progress)?;
            print_summary(&stats, None);
            Ok(())
        }

        Command::Download { input, out } => {
            let identifiers = resolve_import_input(&input)?;
            let out = out.unwrap_or_else(|| settings.package_dir.clone());
            let client = marketplace_client(&settings);
            println!("Downloading {} extensions into {}", identifiers.len(), out.display());
            let stats = download_all(&client, &identifiers, &out, print_progress)?;
            print_summary(&stats, None);
            Ok(())
        }

        Command::Export { out } => {
            let store = ExtensionStore::open(&settings.db_path)?;
            let out = out.unwrap_or_else(|| settings.snapshot_path.clone());
            let report = export_snapshot(&store, &out)?;
            println!(
                "Wrote {} extensions ({} categories) to {}",
                report.records,
                report.categories.len(),
                out.display()
            );
            Ok(())
        }

        Command::Count => {
            let store = ExtensionStore::open(&settings.db_path)?;
            println!("{}", store.count()?);
            Ok(())
        }

        Command::Show { name } => {
            let store = ExtensionStore::open(&settings.db_path)?;
            let identifier = ExtensionIdentifier::parse(&name)?;
            match store.get(&identifier.full_name())? {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                    Ok(())
                }
                None => Err(ImportError::NotFound {
                    identifier: identifier.to_string(),
                }),
            }
        }

        Command::Dedupe { list } => {
            let report = dedupe_identifier_list(&list)?;
            for (entry, extra) in &report.duplicates {
                println!("- {entry} (repeated {extra} times)");
            }
            println!(
                "{} entries, {} unique, removed {}",
                report.original,
                report.unique,
                report.removed()
            );
            Ok(())
        }
    }
}

fn marketplace_client(settings: &Settings) -> MarketplaceClient {
    MarketplaceClient::new(&settings.endpoint, &settings.user_agent, settings.timeout)
}
