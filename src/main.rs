//! CLI entry point for `mailview`.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use mailview::model::mail::MessageProjection;
use mailview::render::projection::Renderer;
use mailview::service;
use mailview::store::EmlDirectory;

#[derive(Parser)]
#[command(
    name = "mailview",
    version,
    about = "Render, inspect and verify RFC 5322 messages"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the projection of a message
    Show {
        file: PathBuf,
        /// Print the full projection as JSON
        #[arg(long)]
        json: bool,
        /// Include attachment payloads (base64 in JSON output)
        #[arg(long)]
        include_content: bool,
    },
    /// Save one attachment of a message
    Attachment {
        file: PathBuf,
        /// Zero-based attachment index, as listed by `show`
        index: usize,
        /// Output path (defaults to the attachment's filename)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Verify the signature of a message
    Verify {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = mailview::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Completions { shell } => return cmd_completions(shell),
        Commands::Manpage => return cmd_manpage(),
        _ => {}
    }

    let renderer = Renderer::from_config(&config).context("invalid configuration")?;

    match cli.command {
        Commands::Show {
            file,
            json,
            include_content,
        } => cmd_show(&renderer, &file, json, include_content),
        Commands::Attachment {
            file,
            index,
            output,
        } => cmd_attachment(&renderer, &file, index, output.as_deref()),
        Commands::Verify { file, json } => cmd_verify(&renderer, &file, json),
        Commands::Completions { .. } | Commands::Manpage => Ok(()),
    }
}

/// Split a message path into a one-directory store and the message id.
fn open_store(file: &Path) -> anyhow::Result<(EmlDirectory, String)> {
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("not a message file: {}", file.display()))?;
    let parent = match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((EmlDirectory::new(parent), name.to_string()))
}

fn cmd_show(
    renderer: &Renderer,
    file: &Path,
    json: bool,
    include_content: bool,
) -> anyhow::Result<()> {
    let (store, id) = open_store(file)?;
    let projection = service::fetch_message(&store, renderer, &id, include_content)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projection)?);
    } else {
        print_projection(&projection);
    }
    Ok(())
}

fn cmd_attachment(
    renderer: &Renderer,
    file: &Path,
    index: usize,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let (store, id) = open_store(file)?;
    let payload = service::fetch_attachment(&store, renderer, &id, index)?;

    // Never let a declared filename pick a directory.
    let target = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(
            Path::new(&payload.filename)
                .file_name()
                .unwrap_or_else(|| OsStr::new("attachment")),
        ),
    };
    std::fs::write(&target, &payload.bytes)
        .with_context(|| format!("writing {}", target.display()))?;

    println!(
        "  Saved {} ({}, {}) to {}",
        payload.filename,
        payload.content_type,
        format_size(payload.bytes.len() as u64, BINARY),
        target.display()
    );
    Ok(())
}

fn cmd_verify(renderer: &Renderer, file: &Path, json: bool) -> anyhow::Result<()> {
    let (store, id) = open_store(file)?;
    let projection = service::fetch_message(&store, renderer, &id, false)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&projection.signature)?);
        return Ok(());
    }
    match &projection.signature {
        Some(verdict) => println!("  Signature: {verdict}"),
        None => println!("  Signature: none"),
    }
    Ok(())
}

/// Print a projection in a human-readable layout.
fn print_projection(p: &MessageProjection) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {:<12} {}", "From:", p.from);
    for (label, value) in [("To:", &p.to), ("Cc:", &p.cc), ("Bcc:", &p.bcc)] {
        if !value.is_empty() {
            println!("  {label:<12} {value}");
        }
    }
    println!("  {:<12} {}", "Date:", p.date);
    println!("  {:<12} {}", "Subject:", p.subject);
    if let Some(id) = &p.message_id {
        println!("  {:<12} {}", "Message-ID:", id);
    }
    if let Some(parent) = &p.in_reply_to {
        println!("  {:<12} {}", "In-Reply-To:", parent);
    }
    if !p.tags.is_empty() {
        let tags: Vec<&str> = p.tags.iter().map(String::as_str).collect();
        println!("  {:<12} {}", "Tags:", tags.join(", "));
    }
    if let Some(verdict) = &p.signature {
        println!("  {:<12} {}", "Signature:", verdict);
    }

    println!();
    println!("{}", p.body.plain.trim_end());
    println!();

    if p.attachments.is_empty() {
        return;
    }
    println!("  {:<4} {:<40} {:<30} {:>10}", "#", "Filename", "Type", "Size");
    println!("  {}", "-".repeat(87));
    for (i, att) in p.attachments.iter().enumerate() {
        let name: String = att.filename.chars().take(39).collect();
        println!(
            "  {:<4} {:<40} {:<30} {:>10}",
            i,
            name,
            att.content_type,
            format_size(att.size_bytes, BINARY)
        );
        if let Some(preview) = &att.preview {
            println!("       {} @ {}", preview.summary, preview.start);
            if let Some(rule) = &preview.recurrence_description {
                println!("       {rule}");
            }
            if !preview.attendees.is_empty() {
                println!("       Attendees: {}", preview.attendees);
            }
        }
    }
    println!();
}

fn setup_logging(level: &str, config: &mailview::config::Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailview::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailview.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailview", &mut std::io::stdout());
    Ok(())
}

fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}
