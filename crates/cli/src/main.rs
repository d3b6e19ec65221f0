mod commands;
mod display;
mod proxy;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cidx_indexer::{ProjectConfig, ProjectLayout};
use cidx_protocol::exit_codes;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cidx", version, about = "Semantic, lexical and temporal code index")]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Suppress progress output; result numbering is kept
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Create the project configuration
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Start the project daemon
    Start {
        /// Run the daemon in this process instead of the background
        #[arg(long)]
        foreground: bool,
        /// Project root for spawned foreground daemons
        root: Option<PathBuf>,
    },
    /// Stop the project daemon
    Stop,
    /// Index the repository
    Index {
        /// Delete the collection and rebuild from scratch
        #[arg(long)]
        clear: bool,
        /// Diff disk against the index, adding and removing as needed
        #[arg(long)]
        reconcile: bool,
        /// Continue an interrupted session
        #[arg(long)]
        resume: bool,
        /// Also index git history into the temporal collection
        #[arg(long)]
        temporal: bool,
        /// Run in-process instead of through the daemon
        #[arg(long)]
        local: bool,
    },
    /// Query the index
    Query {
        query: String,
        /// semantic | fts | hybrid | temporal
        #[arg(long, default_value = "semantic")]
        kind: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Minimum cosine similarity (semantic and temporal)
        #[arg(long)]
        min_score: Option<f32>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long = "include-path")]
        include_paths: Vec<String>,
        #[arg(long = "exclude-path")]
        exclude_paths: Vec<String>,
        #[arg(long = "include-ext")]
        include_extensions: Vec<String>,
        #[arg(long = "exclude-ext")]
        exclude_extensions: Vec<String>,
        #[arg(long)]
        case_sensitive: bool,
        #[arg(long)]
        regex: bool,
        /// Restrict temporal results to blobs present in this commit
        #[arg(long)]
        at_commit: Option<String>,
        /// Temporal lower bound (RFC 3339)
        #[arg(long)]
        since: Option<String>,
        /// Temporal upper bound (RFC 3339)
        #[arg(long)]
        until: Option<String>,
    },
    /// Show index status
    Status,
    /// Watch git refs and keep the temporal index fresh
    Watch {
        #[arg(long)]
        branch: Option<String>,
    },
    /// Validate and repair the project configuration
    FixConfig,
    /// Remove all index data for this project
    Uninstall {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_codes::FAILURE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let root = match (&cli.path, &cli.command) {
        // The spawned foreground daemon receives its root positionally.
        (None, CliCommand::Start { root: Some(root), .. }) => root.clone(),
        (Some(path), _) => path.clone(),
        (None, _) => std::env::current_dir()?,
    };

    // Proxy projects fan supported commands out to their children.
    let layout = ProjectLayout::new(&root);
    if let Ok(config) = ProjectConfig::load(&layout) {
        if config.proxy.proxy_mode {
            if let Some((command, args)) = proxy_invocation(&cli) {
                return proxy::run_in_children(&root, &config.proxy.children, &command, &args)
                    .await;
            }
        }
    }

    match &cli.command {
        CliCommand::Init { force } => commands::init(&root, *force),
        CliCommand::Start { foreground, .. } => commands::start(&root, *foreground).await,
        CliCommand::Stop => commands::stop(&root).await,
        CliCommand::Index {
            clear,
            reconcile,
            resume,
            temporal,
            local,
        } => {
            commands::index(
                &root,
                &commands::IndexArgs {
                    clear: *clear,
                    reconcile: *reconcile,
                    resume: *resume,
                    temporal: *temporal,
                    local: *local,
                },
                cli.quiet,
            )
            .await
        }
        CliCommand::Query {
            query,
            kind,
            limit,
            min_score,
            language,
            include_paths,
            exclude_paths,
            include_extensions,
            exclude_extensions,
            case_sensitive,
            regex,
            at_commit,
            since,
            until,
        } => {
            commands::query(
                &root,
                &commands::QueryArgs {
                    query: query.clone(),
                    kind: kind.clone(),
                    limit: *limit,
                    min_score: *min_score,
                    language: language.clone(),
                    include_paths: include_paths.clone(),
                    exclude_paths: exclude_paths.clone(),
                    include_extensions: include_extensions.clone(),
                    exclude_extensions: exclude_extensions.clone(),
                    case_sensitive: *case_sensitive,
                    regex: *regex,
                    at_commit: at_commit.clone(),
                    since: since.clone(),
                    until: until.clone(),
                },
                cli.quiet,
            )
            .await
        }
        CliCommand::Status => commands::status(&root).await,
        CliCommand::Watch { branch } => commands::watch(&root, branch.clone(), cli.quiet).await,
        CliCommand::FixConfig => commands::fix_config(&root),
        CliCommand::Uninstall { force } => commands::uninstall(&root, *force).await,
    }
}

/// Rebuild the child-process invocation for proxy fan-out. Commands that
/// proxy mode cannot fan out still return here so the router can fail with
/// the documented exit code.
fn proxy_invocation(cli: &Cli) -> Option<(String, Vec<String>)> {
    let mut args: Vec<String> = Vec::new();
    if cli.quiet {
        args.push("--quiet".to_string());
    }
    let command = match &cli.command {
        // Running the foreground daemon in a proxy root is the one local
        // operation.
        CliCommand::Start { foreground: true, .. } => return None,
        CliCommand::Start { .. } => "start".to_string(),
        CliCommand::Stop => "stop".to_string(),
        CliCommand::Status => "status".to_string(),
        CliCommand::FixConfig => "fix-config".to_string(),
        CliCommand::Watch { branch } => {
            if let Some(branch) = branch {
                args.extend(["--branch".to_string(), branch.clone()]);
            }
            "watch".to_string()
        }
        CliCommand::Uninstall { force } => {
            if *force {
                args.push("--force".to_string());
            }
            "uninstall".to_string()
        }
        CliCommand::Query {
            query,
            kind,
            limit,
            min_score,
            language,
            include_paths,
            exclude_paths,
            include_extensions,
            exclude_extensions,
            case_sensitive,
            regex,
            at_commit,
            since,
            until,
        } => {
            args.push(query.clone());
            args.extend(["--kind".to_string(), kind.clone()]);
            args.extend(["--limit".to_string(), limit.to_string()]);
            if let Some(min_score) = min_score {
                args.extend(["--min-score".to_string(), min_score.to_string()]);
            }
            if let Some(language) = language {
                args.extend(["--language".to_string(), language.clone()]);
            }
            for path in include_paths {
                args.extend(["--include-path".to_string(), path.clone()]);
            }
            for path in exclude_paths {
                args.extend(["--exclude-path".to_string(), path.clone()]);
            }
            for ext in include_extensions {
                args.extend(["--include-ext".to_string(), ext.clone()]);
            }
            for ext in exclude_extensions {
                args.extend(["--exclude-ext".to_string(), ext.clone()]);
            }
            if *case_sensitive {
                args.push("--case-sensitive".to_string());
            }
            if *regex {
                args.push("--regex".to_string());
            }
            if let Some(at_commit) = at_commit {
                args.extend(["--at-commit".to_string(), at_commit.clone()]);
            }
            if let Some(since) = since {
                args.extend(["--since".to_string(), since.clone()]);
            }
            if let Some(until) = until {
                args.extend(["--until".to_string(), until.clone()]);
            }
            "query".to_string()
        }
        CliCommand::Init { .. } => "init".to_string(),
        CliCommand::Index { .. } => "index".to_string(),
    };
    Some((command, args))
}
