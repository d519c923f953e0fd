//! novel-runtime - run a novel source plugin from the command line
//!
//! Loads one plugin script, performs a single catalogue operation and prints
//! the result as pretty JSON on stdout. Logs go wherever the logging config
//! sends them.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use novel_runtime::core::{self, CliArgs, Command};
use novel_runtime::plugin::{CatalogueSource, ImageSource, Novel, NovelChapter, NovelJsSource, PluginDescriptor};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::Config::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Print error to stderr since logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting novel-runtime v{}", novel_runtime::VERSION);

    let descriptor = PluginDescriptor::from_file(&args.plugin, args.id.clone(), args.name.clone(), &args.lang, &args.site)
        .with_context(|| format!("Failed to load plugin {}", args.plugin.display()))?;
    info!(
        plugin = %descriptor.id,
        site = %descriptor.site,
        storage = %config.storage.backend,
        "Plugin loaded"
    );

    let source = NovelJsSource::from_config(descriptor, &config)?;
    let outcome = run(&source, &args.command).await;
    source.close().await;

    match outcome {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Err(e)
        }
    }
}

async fn run(source: &NovelJsSource, command: &Command) -> Result<String> {
    match command {
        Command::Filters => pretty(&source.get_filter_list().await?),
        Command::Popular { page } => pretty(&source.get_popular_novels(*page).await?),
        Command::Latest { page } => pretty(&source.get_latest_updates(*page).await?),
        Command::Search { query, page } => {
            let filters = source.get_filter_list().await?;
            pretty(&source.get_search_novels(*page, query, &filters).await?)
        }
        Command::Details { path } => pretty(&source.get_novel_details(&Novel::new(path.as_str(), "")).await?),
        Command::Chapters { path } => pretty(&source.get_chapter_list(&Novel::new(path.as_str(), "")).await?),
        Command::ChapterText { path } => Ok(source
            .get_chapter_text(&NovelChapter::new(path.as_str(), ""))
            .await?),
        Command::WebUrl { path, chapter } => {
            let url = if *chapter {
                source.get_chapter_web_url(path, None).await?
            } else {
                source.get_novel_web_url(path).await?
            };
            pretty(&url)
        }
        Command::Image { reference, output } => {
            let Some(image) = source.fetch_image(reference).await? else {
                return pretty(&None::<()>);
            };
            if let Some(output) = output {
                std::fs::write(output, &image.bytes)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
            }
            pretty(&json!({
                "mimeType": image.mime_type,
                "cacheKey": image.cache_key,
                "size": image.bytes.len(),
            }))
        }
    }
}

fn pretty<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize result")
}
