//! CLI entry point for the archive access tool.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use archive_core::http::{DownloadOptions, FetchOptions, RequestKind};
use archive_core::identifier::NormalizationLevel;
use archive_core::{
    AccessConfig, ArchiveSession, Thumbnail, load_config, load_default_config, normalize,
    search_strategy,
};
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, CacheAction, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.default_log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    // Offline commands never touch the network or the cache.
    match &args.command {
        Command::Normalize { input, level } => {
            let result = normalize(input, NormalizationLevel::from(*level));
            if args.json {
                return print_json(&result);
            }
            match &result.normalized {
                Some(identifier) => println!("{identifier}"),
                None => {
                    let reason = result
                        .first_error()
                        .map_or_else(|| "invalid input".to_string(), ToString::to_string);
                    bail!("cannot normalize {input:?}: {reason}");
                }
            }
            for alternative in &result.alternatives {
                println!("  alt: {alternative}");
            }
            return Ok(());
        }
        Command::Variants { input } => {
            let strategy = search_strategy(input);
            if args.json {
                return print_json(&strategy);
            }
            if strategy.is_empty() {
                bail!("no lookup candidates for {input:?}");
            }
            for variant in &strategy.variants {
                println!("{variant}");
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_effective_config(&args)?;
    let session = ArchiveSession::open(config)
        .await
        .context("failed to start archive session")?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling in-flight requests");
            signal_token.cancel();
        }
    });

    let outcome = run(&args, &session, &cancel).await;
    session.flush().await;
    outcome
}

fn load_effective_config(args: &Args) -> Result<AccessConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => load_default_config().context("failed to load default config")?,
    };
    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(args: &Args, session: &ArchiveSession, cancel: &CancellationToken) -> Result<()> {
    match &args.command {
        Command::Normalize { .. } | Command::Variants { .. } => Ok(()),

        Command::Resolve { input } => {
            let item = session
                .lookup()
                .resolve_with_cancel(input, cancel)
                .await
                .with_context(|| format!("failed to resolve {input:?}"))?;
            if args.json {
                return print_json(&item);
            }
            println!("{}", item.identifier);
            if let Some(title) = &item.title {
                println!("  title:     {title}");
            }
            if let Some(mediatype) = &item.mediatype {
                println!("  mediatype: {mediatype}");
            }
            if let Some(creator) = &item.creator {
                println!("  creator:   {creator}");
            }
            if let Some(date) = &item.date {
                println!("  date:      {date}");
            }
            println!("  files:     {}", item.files.len());
            Ok(())
        }

        Command::Search { query, thumbnails } => {
            let hits = session
                .lookup()
                .search(query)
                .await
                .with_context(|| format!("search for {query:?} failed"))?;

            let thumbs = if *thumbnails {
                let identifiers: Vec<String> =
                    hits.iter().map(|hit| hit.identifier.clone()).collect();
                session.lookup().prefetch_thumbnails(&identifiers).await
            } else {
                Vec::new()
            };

            if args.json {
                #[derive(Serialize)]
                struct SearchOutput<'a> {
                    hits: &'a [archive_core::SearchHit],
                    #[serde(skip_serializing_if = "Vec::is_empty")]
                    thumbnails: Vec<ThumbnailSummary<'a>>,
                }
                let thumbnails = thumbs.iter().map(ThumbnailSummary::from).collect();
                return print_json(&SearchOutput {
                    hits: &hits,
                    thumbnails,
                });
            }

            info!(results = hits.len(), "search complete");
            for hit in &hits {
                let title = hit.title.as_deref().unwrap_or("(untitled)");
                match &hit.mediatype {
                    Some(mediatype) => println!("{}\t{title}\t[{mediatype}]", hit.identifier),
                    None => println!("{}\t{title}", hit.identifier),
                }
            }
            for thumb in &thumbs {
                let summary = ThumbnailSummary::from(thumb);
                match summary.bytes {
                    Some(bytes) => println!("thumbnail {}: {bytes} bytes", summary.identifier),
                    None => println!("thumbnail {}: placeholder", summary.identifier),
                }
            }
            Ok(())
        }

        Command::Fetch {
            url,
            no_cache,
            refresh,
            output,
        } => {
            let options = FetchOptions {
                use_cache: !no_cache,
                force_refresh: *refresh,
                kind: RequestKind::Metadata,
            };
            let body = session
                .client()
                .fetch_with_cancel(url, options, cancel)
                .await
                .with_context(|| format!("failed to fetch {url}"))?;
            match output {
                Some(path) => {
                    tokio::fs::write(path, &body)
                        .await
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(bytes = body.len(), path = %path.display(), "saved");
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    stdout.write_all(&body)?;
                    stdout.flush()?;
                }
            }
            Ok(())
        }

        Command::Download {
            identifier,
            file,
            output,
            max_rate,
        } => {
            let url = session.lookup().endpoints().download(identifier, file);
            let destination = output.clone().unwrap_or_else(|| default_destination(file));
            let mut sink = tokio::fs::File::create(&destination)
                .await
                .with_context(|| format!("failed to create {}", destination.display()))?;

            let options = DownloadOptions {
                max_bytes_per_second: *max_rate,
            };
            let report = match session
                .client()
                .download(&url, &mut sink, options, cancel)
                .await
            {
                Ok(report) => report,
                Err(error) => {
                    drop(sink);
                    if let Err(remove_error) = tokio::fs::remove_file(&destination).await {
                        debug!(%remove_error, "could not remove partial download");
                    }
                    return Err(error).with_context(|| format!("failed to download {url}"));
                }
            };

            if args.json {
                return print_json(&report);
            }
            println!(
                "{} -> {} ({} bytes, {} attempt(s))",
                report.url,
                destination.display(),
                report.bytes_written,
                report.attempts
            );
            Ok(())
        }

        Command::Cache { action } => {
            let cache = session.cache();
            match action {
                CacheAction::Stats => {
                    if args.json {
                        return print_json(&cache.stats().await);
                    }
                    println!("{}", cache.formatted_statistics().await);
                }
                CacheAction::Clear => {
                    session.clear().await;
                    println!("cache cleared");
                }
                CacheAction::Purge => {
                    let summary = cache.purge_expired().await;
                    if args.json {
                        return print_json(&summary);
                    }
                    println!(
                        "purged {} from memory, {} from disk",
                        summary.memory, summary.persistent
                    );
                }
            }
            Ok(())
        }

        Command::Stats => {
            if args.json {
                return print_json(&session.stats().await);
            }
            println!("{}", session.formatted_statistics().await);
            Ok(())
        }
    }
}

/// File name part of an item path, falling back to the whole path.
fn default_destination(file: &str) -> PathBuf {
    Path::new(file)
        .file_name()
        .map_or_else(|| PathBuf::from(file), PathBuf::from)
}

#[derive(Serialize)]
struct ThumbnailSummary<'a> {
    identifier: &'a str,
    bytes: Option<usize>,
}

impl<'a> From<&'a Thumbnail> for ThumbnailSummary<'a> {
    fn from(thumb: &'a Thumbnail) -> Self {
        match thumb {
            Thumbnail::Image { identifier, bytes } => Self {
                identifier,
                bytes: Some(bytes.len()),
            },
            Thumbnail::Placeholder { identifier } => Self {
                identifier,
                bytes: None,
            },
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode JSON output")?;
    println!("{text}");
    Ok(())
}
