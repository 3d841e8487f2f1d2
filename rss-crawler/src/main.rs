use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rss_crawler::{
    db, ArticleStore, CrawlConfig, CrawlStats, Crawler, CrawlerError, FeedManager, Fetcher, HttpContentFetcher,
    HttpEmbeddingHook, LlmSummarizer, MockSummarizer, SourceFeedRetriever, SourceType, Summarizer, WebhookNotifier,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Crawls RSS sources, enriches and summarizes new articles", long_about = None)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Overrides DATABASE_URL.
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawls every active source once.
    Crawl {
        /// Print the run statistics as JSON.
        #[arg(long)]
        json: bool,
        /// Summarize with the offline extractive summarizer.
        #[arg(long)]
        mock_llm: bool,
        /// Cancel the run after this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        source_concurrency: Option<usize>,
    },
    /// Registers a new feed source.
    AddSource {
        name: String,
        feed_url: String,
        #[arg(long = "type", default_value = "rss")]
        source_type: SourceType,
    },
    /// Lists every registered source.
    ListSources,
    /// Shows one source and how many articles it has.
    ShowSource { id: i64 },
    /// Resumes crawling a source.
    Activate { id: i64 },
    /// Stops crawling a source without deleting it.
    Deactivate { id: i64 },
    /// Prints source registry counters.
    Stats,
    /// Lists the most recently stored articles.
    Articles {
        #[arg(long)]
        source: Option<i64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Applies the database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = CrawlConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    info!("Connecting to database: {}", redact(&config.database_url));
    let pool = db::connect(&config.database_url, 10).await.map_err(|e| {
        error!("Failed to connect to database. Make sure PostgreSQL is running.");
        e
    })?;

    match cli.command {
        Command::Migrate => {
            db::migrate(&pool).await?;
        }
        Command::AddSource {
            name,
            feed_url,
            source_type,
        } => {
            let source = FeedManager::new(pool).add_source(&name, &feed_url, source_type).await?;
            println!("{}\t{}\t{}\t{}", source.id, source.source_type, source.name, source.feed_url);
        }
        Command::ListSources => {
            for source in FeedManager::new(pool).list_sources().await? {
                let crawled = format_crawled(source.last_crawled_at);
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    source.id,
                    source.source_type,
                    if source.is_active { "active" } else { "inactive" },
                    source.name,
                    source.feed_url,
                    crawled
                );
            }
        }
        Command::ShowSource { id } => {
            let source = FeedManager::new(pool.clone()).get_source(id).await?;
            let articles = ArticleStore::new(pool).article_count(id).await?;
            println!("id:           {}", source.id);
            println!("name:         {}", source.name);
            println!("feed_url:     {}", source.feed_url);
            println!("type:         {}", source.source_type);
            println!("active:       {}", source.is_active);
            println!("last_crawled: {}", format_crawled(source.last_crawled_at));
            println!("articles:     {}", articles);
        }
        Command::Activate { id } => {
            FeedManager::new(pool).set_active(id, true).await?;
        }
        Command::Deactivate { id } => {
            FeedManager::new(pool).set_active(id, false).await?;
        }
        Command::Stats => {
            let mut stats: Vec<_> = FeedManager::new(pool).get_source_stats().await?.into_iter().collect();
            stats.sort();
            for (key, value) in stats {
                println!("{}: {}", key, value);
            }
        }
        Command::Articles { source, limit } => {
            for article in ArticleStore::new(pool).recent_articles(source, limit).await? {
                println!("{}\t{}\t{}\t{}", article.id, article.source_id, article.created_at.to_rfc3339(), article.url);
                println!("\t{}", article.title);
                if !article.summary.is_empty() {
                    println!("\t{}", article.summary);
                }
            }
        }
        Command::Crawl {
            json,
            mock_llm,
            timeout,
            source_concurrency,
        } => {
            if let Some(secs) = timeout {
                config.run_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            if let Some(n) = source_concurrency {
                config.source_concurrency = n;
            }
            config.validate()?;
            run_crawl(pool, config, mock_llm, json).await?;
        }
    }

    Ok(())
}

async fn run_crawl(
    pool: sqlx::PgPool,
    config: CrawlConfig,
    mock_llm: bool,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone())?);
    let summarizer: Arc<dyn Summarizer> = if mock_llm {
        Arc::new(MockSummarizer::new())
    } else {
        Arc::new(LlmSummarizer::new(config.llm.clone())?)
    };

    let mut builder = Crawler::builder(
        Arc::new(FeedManager::new(pool.clone())),
        Arc::new(ArticleStore::new(pool)),
        Arc::new(SourceFeedRetriever::new(fetcher.clone())),
        Arc::new(HttpContentFetcher::new(fetcher)),
        summarizer,
    )
    .config(&config);
    if let Some(url) = &config.notify_webhook_url {
        builder = builder.notifier(Arc::new(WebhookNotifier::new(url.as_str())?));
    }
    if let Some(url) = &config.embedding_url {
        builder = builder.embedding_hook(Arc::new(HttpEmbeddingHook::new(url.as_str())?));
    }
    let crawler = builder.build();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling crawl");
                cancel.cancel();
            }
        });
    }
    if let Some(limit) = config.run_timeout {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("Crawl exceeded {}s, cancelling", limit.as_secs());
            cancel.cancel();
        });
    }

    match crawler.crawl_all_sources(&cancel).await {
        Ok(stats) => {
            print_stats(&stats, json)?;
            Ok(())
        }
        Err(CrawlerError::Cancelled { partial }) => {
            print_stats(&partial, json)?;
            Err(Box::new(CrawlerError::Cancelled { partial }))
        }
        Err(e) => Err(Box::new(e)),
    }
}

fn format_crawled(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.to_rfc3339()).unwrap_or_else(|| "never".to_string())
}

fn print_stats(stats: &CrawlStats, json: bool) -> rss_crawler::Result<()> {
    if json {
        println!("{}", stats.to_json()?);
    } else {
        println!("{}", stats);
    }
    Ok(())
}

fn redact(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => database_url.to_string(),
    }
}
