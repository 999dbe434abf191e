use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cartelera_common::{Config, SourceTier};
use cartelera_store::PgEventRepository;
use render_client::RenderClient;

use cartelera_ingest::agents::{ChatEndpoint, EmbeddingEndpoint};
use cartelera_ingest::fetch::HttpFetcher;
use cartelera_ingest::geocode::Geocoder;
use cartelera_ingest::images::{ImageCache, ImageResolver, PexelsSearcher, UnsplashSearcher};
use cartelera_ingest::pipeline::{Pipeline, PipelineConfig};
use cartelera_ingest::rate_limit::{RateLimitConfig, RateLimiter};
use cartelera_ingest::registry::SourceRegistry;
use cartelera_ingest::report::{summary_table, PipelineResult};

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_INTERNAL: i32 = 2;

#[derive(Parser)]
#[command(name = "cartelera", about = "Multi-source ingestion pipeline for Spanish cultural events")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, enrich and persist events from one source or a whole tier.
    Insert {
        /// Process only this source slug.
        #[arg(short, long)]
        source: Option<String>,
        /// Process all active sources of this tier (gold, silver, bronze).
        #[arg(short, long)]
        tier: Option<String>,
        /// Restrict tier processing to one comunidad autónoma.
        #[arg(short, long)]
        region: Option<String>,
        /// Maximum events per source.
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Run everything except persistence.
        #[arg(long)]
        dry_run: bool,
        /// Update existing events instead of skipping them.
        #[arg(long)]
        upsert: bool,
        /// Skip detail-page fetches (Silver/Bronze).
        #[arg(long)]
        no_details: bool,
        /// Skip model enrichment.
        #[arg(long)]
        no_enrich: bool,
        /// Skip image resolution.
        #[arg(long)]
        no_images: bool,
        /// Prefix titles with the source slug (test runs).
        #[arg(long)]
        debug_prefix: bool,
    },
    /// List the bundled sources.
    Sources {
        #[arg(short, long)]
        tier: Option<String>,
        #[arg(short, long)]
        region: Option<String>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show version and source counts.
    Version,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("cartelera=info".parse().expect("directive")),
        )
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Insert {
            source,
            tier,
            region,
            limit,
            dry_run,
            upsert,
            no_details,
            no_enrich,
            no_images,
            debug_prefix,
        } => {
            run_insert(InsertArgs {
                source,
                tier,
                region,
                limit,
                dry_run,
                upsert,
                no_details,
                no_enrich,
                no_images,
                debug_prefix,
            })
            .await
        }
        Command::Sources { tier, region, verbose } => run_sources(tier, region, verbose),
        Command::Version => run_version(),
    };
    std::process::exit(code);
}

struct InsertArgs {
    source: Option<String>,
    tier: Option<String>,
    region: Option<String>,
    limit: usize,
    dry_run: bool,
    upsert: bool,
    no_details: bool,
    no_enrich: bool,
    no_images: bool,
    debug_prefix: bool,
}

async fn run_insert(args: InsertArgs) -> i32 {
    let registry = Arc::new(SourceRegistry::bundled());

    // --source and --tier are mutually exclusive; one is required.
    let slugs: Vec<String> = match (&args.source, &args.tier) {
        (Some(_), Some(_)) => {
            eprintln!("error: --source and --tier are mutually exclusive");
            return EXIT_USAGE;
        }
        (None, None) => {
            eprintln!("error: one of --source or --tier is required");
            return EXIT_USAGE;
        }
        (Some(slug), None) => {
            if registry.get(slug).is_none() {
                eprintln!("error: unknown source: {slug}");
                let known = registry.slugs().join(", ");
                eprintln!("known sources: {known}");
                return EXIT_USAGE;
            }
            vec![slug.clone()]
        }
        (None, Some(tier)) => {
            let tier: SourceTier = match tier.to_lowercase().parse() {
                Ok(tier) => tier,
                Err(_) => {
                    eprintln!("error: invalid tier '{tier}' (gold, silver, bronze)");
                    return EXIT_USAGE;
                }
            };
            let mut sources = registry.by_tier(tier);
            if let Some(region) = &args.region {
                sources.retain(|s| s.meta().region.eq_ignore_ascii_case(region));
            }
            sources.iter().map(|s| s.slug().to_string()).collect()
        }
    };

    if slugs.is_empty() {
        eprintln!("no sources match the criteria");
        return EXIT_USAGE;
    }

    let app = Config::from_env();
    app.log_redacted();

    let pipeline = match build_pipeline(&app, registry, args.dry_run).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_INTERNAL;
        }
    };

    info!(sources = slugs.len(), limit = args.limit, dry_run = args.dry_run, "insert run");

    let mut results: Vec<PipelineResult> = Vec::new();
    for slug in &slugs {
        let config = PipelineConfig::builder()
            .source_slug(slug.clone())
            .limit(Some(args.limit))
            .dry_run(args.dry_run)
            .upsert(args.upsert)
            .fetch_details(!args.no_details)
            .skip_enrichment(args.no_enrich)
            .skip_images(args.no_images)
            .debug_prefix(args.debug_prefix)
            .build();

        let result = pipeline.run(config).await;
        println!("{result}");
        results.push(result);
    }

    println!("{}", summary_table(&results));

    if results.iter().any(|r| r.success) {
        EXIT_OK
    } else {
        EXIT_INTERNAL
    }
}

async fn build_pipeline(
    app: &Config,
    registry: Arc<SourceRegistry>,
    dry_run: bool,
) -> anyhow::Result<Pipeline<PgEventRepository>> {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));

    let renderer = (!app.render_base_url.is_empty()).then(|| {
        Arc::new(RenderClient::new(
            &app.render_base_url,
            Some(app.render_api_key.as_str()),
        ))
    });

    let fetcher = Arc::new(HttpFetcher::new(Arc::clone(&limiter), renderer));
    let repo = Arc::new(PgEventRepository::connect(&app.database_url).await?);

    let primary: Option<Box<dyn cartelera_ingest::images::ImageSearcher>> =
        (!app.unsplash_access_key.is_empty())
            .then(|| Box::new(UnsplashSearcher::new(&app.unsplash_access_key)) as _);
    let secondary: Option<Box<dyn cartelera_ingest::images::ImageSearcher>> =
        (!app.pexels_api_key.is_empty())
            .then(|| Box::new(PexelsSearcher::new(&app.pexels_api_key)) as _);
    let images = Arc::new(ImageResolver::new(
        primary,
        secondary,
        ImageCache::load(&app.cache_dir),
    ));

    let mut pipeline = Pipeline::new(registry, fetcher, repo, app.clone())
        .with_chat_model(Arc::new(ChatEndpoint::new(app)))
        .with_embedder(Arc::new(EmbeddingEndpoint::new(app)))
        .with_images(images);

    // A dry run skips geocoding; the politeness interval makes it slow
    // and nothing is persisted anyway.
    if !dry_run {
        pipeline = pipeline.with_geocoder(Arc::new(Geocoder::new(&app.geocoder_user_agent)));
    }

    Ok(pipeline)
}

fn run_sources(tier: Option<String>, region: Option<String>, verbose: bool) -> i32 {
    let registry = SourceRegistry::bundled();

    let tier = match tier.map(|t| t.to_lowercase().parse::<SourceTier>()) {
        Some(Ok(tier)) => Some(tier),
        Some(Err(_)) => {
            eprintln!("error: invalid tier (gold, silver, bronze)");
            return EXIT_USAGE;
        }
        None => None,
    };

    let mut sources = registry.all();
    if let Some(tier) = tier {
        sources.retain(|s| s.tier() == tier);
    }
    if let Some(region) = &region {
        sources.retain(|s| s.meta().region.eq_ignore_ascii_case(region));
    }

    if sources.is_empty() {
        println!("no sources match the criteria");
        return EXIT_OK;
    }

    for tier in [SourceTier::Gold, SourceTier::Silver, SourceTier::Bronze] {
        let of_tier: Vec<_> = sources.iter().filter(|s| s.tier() == tier).collect();
        if of_tier.is_empty() {
            continue;
        }
        println!("\n{} ({} sources)", tier.to_string().to_uppercase(), of_tier.len());
        for source in of_tier {
            if verbose {
                println!(
                    "  {:<26} {:<34} {} [{}]",
                    source.slug(),
                    source.meta().name,
                    source.meta().region,
                    source.meta().region_code
                );
            } else {
                println!("  {:<26} {}", source.slug(), source.meta().region);
            }
        }
    }

    let counts = registry.count_by_tier();
    println!("\nTotal: {} sources", registry.count());
    for (tier, count) in counts {
        println!("  {tier}: {count}");
    }
    EXIT_OK
}

fn run_version() -> i32 {
    let registry = SourceRegistry::bundled();
    println!("cartelera {}", env!("CARGO_PKG_VERSION"));
    for (tier, count) in registry.count_by_tier() {
        println!("  {tier}: {count}");
    }
    println!("  total: {}", registry.count());
    EXIT_OK
}
