use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use booru_tag_core::{
    import_json_cache, normalize_tag, normalize_tags, parse_delay, split_tag_input,
    DanbooruClient, Expansion, ExpanderConfig, GraphStore, ProgressObserver, SemanticRelations,
    TagExpander,
};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "danbooru-tag-expander",
    version,
    about = "Expand Danbooru tags with their implications and aliases"
)]
struct Cli {
    /// Danbooru site URL (default: $DANBOORU_SITE_URL or https://danbooru.donmai.us)
    #[arg(long, global = true)]
    site_url: Option<String>,

    /// Danbooru username (default: $DANBOORU_USERNAME)
    #[arg(long, global = true)]
    username: Option<String>,

    /// Danbooru API key (default: $DANBOORU_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Directory for the tag graph cache (default: $DANBOORU_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Keep the tag graph in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Seconds to wait between API requests (default: $DANBOORU_REQUEST_DELAY or 0.5)
    #[arg(long, global = true)]
    delay: Option<String>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print results and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand tags with their implications and aliases
    Expand {
        /// Tags to expand (comma-separated values are split)
        tags: Vec<String>,
        /// Read more tags from a file, or `-` for stdin
        #[arg(long, short, value_hint = clap::ValueHint::FilePath)]
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Print each tag's frequency next to it (text format)
        #[arg(long)]
        counts: bool,
        /// Keep deprecated tags in the result
        #[arg(long)]
        include_deprecated: bool,
        /// Use only the cached graph, no API requests
        #[arg(long)]
        offline: bool,
    },
    /// Show implications and aliases of a single tag
    Relations {
        tag: String,
        /// Keep deprecated tags in the result
        #[arg(long)]
        include_deprecated: bool,
        /// Use only the cached graph, no API requests
        #[arg(long)]
        offline: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Inspect or seed the tag graph cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Generate shell completion script
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show tag and relation counts
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Import per-tag JSON cache files from a directory
    Import {
        #[arg(value_hint = clap::ValueHint::DirPath)]
        dir: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Commands::Completion { shell } = cli.command {
        return completion_command(shell);
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Expand {
            tags,
            file,
            format,
            counts,
            include_deprecated,
            offline,
        } => expand_command(
            &config,
            tags,
            file.as_deref(),
            format,
            counts,
            include_deprecated,
            offline,
            cli.quiet,
        ),
        Commands::Relations {
            tag,
            include_deprecated,
            offline,
            json,
        } => relations_command(&config, &tag, include_deprecated, offline, json, cli.quiet),
        Commands::Cache { command } => cache_command(&config, command, cli.quiet),
        Commands::Completion { shell } => completion_command(shell),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "booru_tag_core={level},danbooru_tag_expander={level}"
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(cli: &Cli) -> Result<ExpanderConfig> {
    let mut config = ExpanderConfig::from_env().context("failed to read configuration")?;
    if let Some(site_url) = &cli.site_url {
        config = config.with_site_url(site_url);
    }
    if cli.username.is_some() {
        config.username = cli.username.clone();
    }
    if cli.api_key.is_some() {
        config.api_key = cli.api_key.clone();
    }
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir.clone());
    }
    if cli.no_cache {
        config.use_cache = false;
    }
    if let Some(raw) = &cli.delay {
        config.request_delay = parse_delay(raw)?;
    }
    Ok(config)
}

fn completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

fn open_expander(config: &ExpanderConfig) -> Result<TagExpander<DanbooruClient>> {
    if !config.has_credentials() {
        warn!("no Danbooru credentials configured, using anonymous access");
    }
    let client = DanbooruClient::new(config).context("failed to set up Danbooru client")?;

    match config.cache_path() {
        Some(dir) => {
            let store = GraphStore::open_dir(dir)
                .with_context(|| format!("failed to open graph cache in {}", dir.display()))?;
            let expander = TagExpander::with_store(client, store, Some(dir))
                .with_context(|| format!("failed to load graph cache in {}", dir.display()))?;
            Ok(expander)
        }
        None => {
            debug!("graph cache disabled, keeping tags in memory");
            Ok(TagExpander::new(client))
        }
    }
}

fn open_store(config: &ExpanderConfig) -> Result<GraphStore> {
    let dir = config.cache_path().ok_or_else(|| {
        anyhow!("no cache directory configured; pass --cache-dir or set DANBOORU_CACHE_DIR")
    })?;
    GraphStore::open_dir(dir)
        .with_context(|| format!("failed to open graph cache in {}", dir.display()))
}

#[allow(clippy::too_many_arguments)]
fn expand_command(
    config: &ExpanderConfig,
    tags: Vec<String>,
    file: Option<&Path>,
    format: OutputFormat,
    counts: bool,
    include_deprecated: bool,
    offline: bool,
    quiet: bool,
) -> Result<()> {
    let mut raw = flatten_tag_args(tags);
    if let Some(path) = file {
        raw.extend(read_tag_file(path)?);
    }
    let seeds = normalize_tags(&raw);
    if seeds.is_empty() {
        return Err(anyhow!("no tags provided"));
    }

    let mut expander = open_expander(config)?;
    let expansion = if offline {
        expander.expand_cached(&seeds, include_deprecated)
    } else {
        let progress = fetch_progress(quiet);
        let observer = progress.as_ref().map(|pb| FetchProgress { pb: pb.clone() });
        let result = expander.expand_tags_with(
            &seeds,
            include_deprecated,
            observer.as_ref().map(|o| o as &dyn ProgressObserver),
        );
        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }
        result.context("failed to expand tags")?
    };

    let mut out = io::stdout().lock();
    write_expansion(&mut out, &expansion, format, counts)?;
    Ok(())
}

fn relations_command(
    config: &ExpanderConfig,
    tag: &str,
    include_deprecated: bool,
    offline: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let tag = normalize_tag(tag).ok_or_else(|| anyhow!("no tag provided"))?;
    let mut expander = open_expander(config)?;

    if offline {
        if !expander.is_tag_cached(&tag) && !quiet {
            eprintln!("warning: {tag} is not cached; relations may be incomplete");
        }
    } else {
        let progress = fetch_progress(quiet);
        let observer = progress.as_ref().map(|pb| FetchProgress { pb: pb.clone() });
        let result = expander.ensure_fetched(
            std::slice::from_ref(&tag),
            observer.as_ref().map(|o| o as &dyn ProgressObserver),
        );
        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }
        result.with_context(|| format!("failed to fetch relations for {tag}"))?;
    }

    let relations = expander.relations(&tag, include_deprecated);
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &relations)?;
        writeln!(out)?;
    } else {
        write_relations(&mut out, &relations)?;
    }
    Ok(())
}

fn cache_command(config: &ExpanderConfig, command: CacheCommands, quiet: bool) -> Result<()> {
    match command {
        CacheCommands::Stats { json } => cache_stats_command(config, json),
        CacheCommands::Import { dir } => cache_import_command(config, &dir, quiet),
    }
}

fn cache_stats_command(config: &ExpanderConfig, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let stats = store.load()?.stats();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Cache: {}", store.path().display());
    println!("Tags: {}", stats.tags);
    println!("Fetched: {}", stats.fetched);
    println!("Deprecated: {}", stats.deprecated);
    println!("Implications: {}", stats.implications);
    println!("Aliases: {}", stats.aliases);
    let format_time = |at: Option<chrono::DateTime<chrono::Utc>>| {
        at.map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "(none)".to_string())
    };
    println!("Oldest fetch: {}", format_time(stats.oldest_fetch));
    println!("Newest fetch: {}", format_time(stats.newest_fetch));
    Ok(())
}

fn cache_import_command(config: &ExpanderConfig, dir: &Path, quiet: bool) -> Result<()> {
    if !dir.is_dir() {
        return Err(anyhow!("not a directory: {}", dir.display()));
    }
    let mut store = open_store(config)?;
    let mut graph = store.load()?;
    let report = import_json_cache(dir, &mut graph);
    if !quiet {
        for warning in &report.warnings {
            eprintln!("warning: {}: {}", warning.path.display(), warning.message);
        }
    }
    store.save(&graph).context("failed to write graph cache")?;
    println!(
        "Imported {} tags, {} implications, {} aliases into {}",
        report.tags,
        report.implications,
        report.aliases,
        store.path().display()
    );
    Ok(())
}

fn fetch_progress(quiet: bool) -> Option<ProgressBar> {
    if quiet || !io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_message("fetching tags");
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

struct FetchProgress {
    pb: ProgressBar,
}

impl ProgressObserver for FetchProgress {
    fn inc_length(&self, delta: u64) {
        self.pb.inc_length(delta);
    }

    fn inc(&self, delta: u64) {
        self.pb.inc(delta);
    }
}

fn read_tag_file(path: &Path) -> Result<Vec<String>> {
    let text = if path == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read tags from stdin")?;
        buf
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("failed to read tags from {}", path.display()))?
    };
    Ok(parse_tag_text(&text))
}

fn parse_tag_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .flat_map(split_tag_input)
        .collect()
}

fn flatten_tag_args(tags: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for tag in tags {
        if tag.contains(',') {
            for part in tag.split(',') {
                let part = part.trim();
                if !part.is_empty() {
                    out.push(part.to_string());
                }
            }
        } else {
            let tag = tag.trim();
            if !tag.is_empty() {
                out.push(tag.to_string());
            }
        }
    }
    out
}

fn write_expansion<W: Write>(
    out: &mut W,
    expansion: &Expansion,
    format: OutputFormat,
    counts: bool,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for (tag, frequency) in expansion.ranked() {
                if counts {
                    writeln!(out, "{tag}\t{frequency}")?;
                } else {
                    writeln!(out, "{tag}")?;
                }
            }
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(&mut *out);
            writer.write_record(["tag", "frequency"])?;
            for (tag, frequency) in expansion.ranked() {
                writer.write_record([tag, frequency.to_string().as_str()])?;
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, expansion)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_relations<W: Write>(out: &mut W, relations: &SemanticRelations) -> io::Result<()> {
    fn list<'a>(tags: impl IntoIterator<Item = &'a String>) -> String {
        let joined = tags
            .into_iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            "(none)".to_string()
        } else {
            joined
        }
    }

    writeln!(out, "Tag: {}", relations.tag)?;
    writeln!(
        out,
        "Canonical: {}",
        if relations.is_canonical { "yes" } else { "no" }
    )?;
    writeln!(out, "Implies: {}", list(&relations.direct_implications))?;
    writeln!(
        out,
        "Implies (transitive): {}",
        list(&relations.transitive_implications)
    )?;
    writeln!(out, "Implied by: {}", list(&relations.implied_by))?;
    writeln!(out, "Aliased to: {}", list(&relations.direct_aliases))?;
    writeln!(out, "Aliased from: {}", list(&relations.aliased_from))?;
    writeln!(out, "Alias group: {}", list(&relations.alias_group))?;
    writeln!(out, "All related: {}", list(&relations.all_related))
}
