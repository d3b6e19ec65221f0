use anyhow::{Context, Result};
use cidx_protocol::{exit_codes, PROXY_SUPPORTED_COMMANDS};
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::Semaphore;

const MAX_PARALLEL_CHILDREN: usize = 10;

/// Result of one child invocation.
struct ChildOutcome {
    index: usize,
    child: PathBuf,
    exit_code: i32,
    stdout: String,
    stderr: String,
}

/// True when proxy mode supports the command.
#[must_use]
pub fn is_supported(command: &str) -> bool {
    PROXY_SUPPORTED_COMMANDS.contains(&command)
}

/// Message printed (with exit code 3) for commands proxy mode cannot fan
/// out.
#[must_use]
pub fn unsupported_message(command: &str) -> String {
    format!(
        "'{command}' is not supported in proxy mode.\n\
         Supported commands: {}.\n\
         To run '{command}' against a single repository, cd into it first.",
        PROXY_SUPPORTED_COMMANDS.join(", ")
    )
}

/// Fan a command out to every child repository with a bounded worker pool,
/// concatenate child stdout in stable (configured) order, frame child
/// failures, and compute the aggregate exit code:
/// 0 all succeeded, 2 partial, 1 all failed.
pub async fn run_in_children(
    root: &Path,
    children: &[String],
    command: &str,
    args: &[String],
) -> Result<i32> {
    if !is_supported(command) {
        eprintln!("{}", unsupported_message(command));
        return Ok(exit_codes::UNSUPPORTED_PROXY_COMMAND);
    }
    if children.is_empty() {
        eprintln!("Proxy project has no child repositories configured.");
        return Ok(exit_codes::FAILURE);
    }

    let exe = std::env::current_exe().context("cannot locate cidx executable")?;
    let semaphore = std::sync::Arc::new(Semaphore::new(MAX_PARALLEL_CHILDREN));

    let mut tasks = FuturesUnordered::new();
    for (index, child) in children.iter().enumerate() {
        let child_path = resolve_child(root, child);
        let exe = exe.clone();
        let command = command.to_string();
        let args = args.to_vec();
        let semaphore = std::sync::Arc::clone(&semaphore);
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            run_child(index, child_path, &exe, &command, &args).await
        }));
    }

    let mut outcomes: Vec<ChildOutcome> = Vec::with_capacity(children.len());
    while let Some(joined) = tasks.next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                log::error!("Proxy child task panicked: {err}");
            }
        }
    }
    // Stable output order regardless of completion order.
    outcomes.sort_by_key(|outcome| outcome.index);

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for outcome in &outcomes {
        if outcome.exit_code == 0 {
            succeeded += 1;
            print!("{}", outcome.stdout);
        } else {
            failed += 1;
            print!("{}", outcome.stdout);
            eprintln!("ERROR in {}\n{}", outcome.child.display(), outcome.stderr);
        }
    }

    Ok(if failed == 0 {
        exit_codes::SUCCESS
    } else if succeeded > 0 {
        exit_codes::PARTIAL
    } else {
        exit_codes::FAILURE
    })
}

fn resolve_child(root: &Path, child: &str) -> PathBuf {
    let path = Path::new(child);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

async fn run_child(
    index: usize,
    child: PathBuf,
    exe: &Path,
    command: &str,
    args: &[String],
) -> ChildOutcome {
    let output = Command::new(exe)
        .arg(command)
        .args(args)
        .current_dir(&child)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    match output {
        Ok(output) => ChildOutcome {
            index,
            child,
            exit_code: output.status.code().unwrap_or(exit_codes::FAILURE),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(err) => ChildOutcome {
            index,
            child,
            exit_code: exit_codes::FAILURE,
            stdout: String::new(),
            stderr: format!("failed to spawn child command: {err}\n"),
        },
    }
}
