//! `guanxi` CLI — composes the services and runs pipeline stages.

use anyhow::Context;
use clap::{Parser, Subcommand};
use llm::{GeminiClient, GeminiConfig, LlmService, ModelSlot, PromptSet, ServiceModels};
use pipeline::{GraphCleaner, GraphMerger, ListProcessor, PipelineConfig, WatchList};
use ratelimit::ApiRateLimiter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wiki::{WikiClient, WikiConfig};

#[derive(Parser)]
#[command(name = "guanxi")]
#[command(about = "Knowledge-graph pipeline over Wikipedia and secondary sources", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file (optional; defaults apply when absent).
    #[arg(short, long, default_value = "guanxi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Screen the watch list and extract fragments for stale entries
    Process,

    /// Merge new fragment files into the master graph
    Merge,

    /// Run the eight-step deep maintenance pass
    Maintain,

    /// Process, merge and maintain in sequence
    Pipeline,

    /// Refresh the pageviews cache for every watch-list entry
    Pageviews,
}

struct Services {
    wiki: Arc<WikiClient>,
    watchlist: Arc<WatchList>,
    llm: Arc<LlmService>,
}

fn build_services(config: &PipelineConfig) -> anyhow::Result<Services> {
    let watchlist = Arc::new(WatchList::new(&config.paths.list_file));

    let wiki = Arc::new(
        WikiClient::new(WikiConfig {
            cache_dir: config.paths.cache_dir.clone(),
            requests_per_minute: config.wiki.requests_per_minute,
            max_inflight: config.wiki.max_inflight,
            ..WikiConfig::default()
        })
        .context("failed to build wiki client")?
        .with_title_sink(watchlist.clone()),
    );

    let slot = |budget: &pipeline::config::ModelBudget| -> anyhow::Result<ModelSlot> {
        let client = GeminiClient::new(GeminiConfig::from_env(
            &config.llm.api_key_env,
            budget.model.as_str(),
        )?)?;
        let mut limiter =
            ApiRateLimiter::new(budget.model.as_str(), budget.rpm, Duration::from_secs(60));
        if let Some(rpd) = budget.rpd {
            let counter = config
                .paths
                .cache_dir
                .join(format!("{}_rpd_counter.json", budget.model));
            limiter = limiter.with_daily_quota(rpd, counter);
        }
        Ok(ModelSlot::new(Arc::new(client), limiter))
    };

    let llm = Arc::new(LlmService::new(
        ServiceModels {
            parser: slot(&config.llm.parser)?,
            merge_check: slot(&config.llm.merge_check)?,
            merge_execute: slot(&config.llm.merge_execute)?,
            relation_audit: slot(&config.llm.relation_audit)?,
            validate_pr: slot(&config.llm.validate_pr)?,
        },
        PromptSet::load(&config.paths.prompts_dir)?,
        &config.paths.master_graph,
        config.llm.few_shot_nodes,
        config.llm.few_shot_rels,
    ));

    Ok(Services {
        wiki,
        watchlist,
        llm,
    })
}

async fn run_process(config: &PipelineConfig, services: &Services) -> anyhow::Result<()> {
    ListProcessor::new(
        services.wiki.clone(),
        services.llm.clone(),
        services.watchlist.clone(),
        config.clone(),
    )
    .run()
    .await?;
    Ok(())
}

async fn run_merge(config: &PipelineConfig, services: &Services) -> anyhow::Result<()> {
    GraphMerger::new(
        &config.paths.master_graph,
        &config.paths.processed_log,
        &config.paths.data_dir,
        services.wiki.clone(),
        services.llm.clone(),
        services.watchlist.clone(),
    )
    .run()
    .await?;
    Ok(())
}

async fn run_maintain(config: &PipelineConfig, services: &Services) -> anyhow::Result<()> {
    GraphCleaner::new(
        &config.paths.master_graph,
        config.paths.cache_dir.join("false_relations_cache.json"),
        services.wiki.clone(),
        services.llm.clone(),
        services.watchlist.clone(),
        config.audit.clone(),
        config.maintenance.clone(),
    )
    .run()
    .await?;
    Ok(())
}

async fn run_pageviews(services: &Services) -> anyhow::Result<()> {
    let sections = services.watchlist.parse().await;
    for section in sections {
        for entry in section.entries {
            let lang = entry.lang.as_str();
            match services.wiki.get_pageviews_stats(&entry.display_name, lang).await {
                Some(stats) => info!(
                    item = %entry.display_name,
                    total = stats.total_views,
                    avg_daily = format!("{:.2}", stats.avg_daily_views),
                    "pageviews refreshed"
                ),
                None => info!(item = %entry.display_name, "pageviews unavailable"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)?;
    let services = build_services(&config)?;

    match cli.command {
        Commands::Process => run_process(&config, &services).await?,
        Commands::Merge => run_merge(&config, &services).await?,
        Commands::Maintain => run_maintain(&config, &services).await?,
        Commands::Pipeline => {
            info!("stage 1/3: list processing");
            run_process(&config, &services).await?;
            info!("stage 2/3: fragment merge");
            run_merge(&config, &services).await?;
            info!("stage 3/3: deep maintenance");
            run_maintain(&config, &services).await?;
        }
        Commands::Pageviews => run_pageviews(&services).await?,
    }

    // Cache persistence failures are fatal: losing them re-spends the
    // network budget and hides partial state.
    services.wiki.save_caches().await?;
    Ok(())
}
