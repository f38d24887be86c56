use anyhow::Context;
use catalog_store::catalog::{CatalogApi, FilterSet, UniversityRecord};
use catalog_store::cli::{Args, CacheAction, Command};
use catalog_store::config::Config;
use catalog_store::logging::setup_logging;
use catalog_store::store::persist::{FileStorage, Persistence};
use catalog_store::store::{CatalogStore, FetchOptions, StoreSettings};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging needs the config, so a config error can only go to stderr.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        api = %config.api_base_url,
        state_dir = %config.state_dir.display(),
        "starting catalog"
    );

    match run(&config, args.command).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "catalog command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, command: Command) -> anyhow::Result<ExitCode> {
    let api = CatalogApi::new_with_config(
        &config.api_base_url,
        config.request_timeout,
        &config.rate_limiting,
    )
    .context("Failed to create catalog API client")?;
    let persistence = Persistence::new(Box::new(FileStorage::new(&config.state_dir)));
    let store = CatalogStore::new(Arc::new(api), persistence, StoreSettings::from(config));
    store.init();

    let code = match command {
        Command::Search {
            query,
            country,
            name,
            fees,
            page,
            prefetch,
            refresh,
        } => {
            let filters = FilterSet {
                country,
                university_name: name,
                fees,
            };
            store.set_search_query(query.clone());
            store.set_filters(filters.clone());
            store.set_page(page);

            let options = if refresh {
                FetchOptions::refresh()
            } else {
                FetchOptions::default()
            };
            store.fetch_catalog(&query, &filters, page, options).await;

            if prefetch > 0 {
                let ahead: Vec<i64> = (1..=i64::from(prefetch)).map(|n| page.max(1) + n).collect();
                store.prefetch_pages(&query, &filters, &ahead).await;
            }
            print_listing(&store)
        }
        Command::Detail {
            identifier,
            refresh,
        } => {
            let record = store.fetch_detail_by_id(&identifier, refresh).await;
            print_detail(&store, &identifier, record.as_deref())?
        }
        Command::Cache { action } => {
            match action {
                CacheAction::Stats => {}
                CacheAction::Clear => store.clear_cache(),
                CacheAction::Sweep => {
                    let swept = store.sweep();
                    println!("swept {swept} expired page(s)");
                }
            }
            let stats = store.stats();
            println!(
                "pages: {}\nuniversities: {}\nin flight: {}\npersistence: {}",
                stats.listings,
                stats.details,
                stats.inflight,
                if stats.persistence_degraded {
                    "memory only"
                } else {
                    "ok"
                }
            );
            ExitCode::SUCCESS
        }
    };

    store.teardown();
    Ok(code)
}

fn print_listing(store: &CatalogStore) -> ExitCode {
    let state = store.snapshot();
    for record in &state.universities {
        println!("{}", display_name(record));
    }
    let p = state.pagination;
    println!("-- page {} of {} ({} total)", p.page, p.pages, p.total);

    match state.error {
        Some(message) => {
            eprintln!("{message}");
            if state.showing_cached {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        None => ExitCode::SUCCESS,
    }
}

fn print_detail(
    store: &CatalogStore,
    identifier: &str,
    record: Option<&UniversityRecord>,
) -> anyhow::Result<ExitCode> {
    match record {
        Some(record) => {
            let json = serde_json::to_string_pretty(record).context("Failed to render record")?;
            println!("{json}");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let state = store.snapshot();
            match state.detail_error {
                Some(message) => eprintln!("{message}"),
                None => eprintln!("University not found: {identifier}"),
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn display_name(record: &UniversityRecord) -> String {
    match (&record.name, &record.slug) {
        (Some(name), Some(slug)) => format!("{name} [{slug}]"),
        (Some(name), None) => name.clone(),
        (None, Some(slug)) => slug.clone(),
        (None, None) => record.id.clone(),
    }
}
