//! CLI entry point for `mimespool`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};

use mimespool::config::Config;
use mimespool::export::multipart::{MultipartWriter, OutgoingPart};
use mimespool::model::part::Part;

#[derive(Parser)]
#[command(
    name = "mimespool",
    version,
    about = "Split and build multipart/related messages with bounded memory"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Bytes of a part body kept in memory before spilling to disk
    #[arg(long, global = true, value_name = "BYTES")]
    threshold: Option<u64>,

    /// Directory for spill files
    #[arg(long, global = true, value_name = "DIR")]
    spool_dir: Option<PathBuf>,

    /// Per-message property override, e.g. attachment-max-count=10
    #[arg(short = 'D', long = "property", global = true, value_name = "KEY=VALUE")]
    properties: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the parts of a message
    Inspect {
        path: PathBuf,
        /// Content-Type header of the message
        #[arg(short = 't', long = "content-type")]
        content_type: String,
        #[arg(long)]
        json: bool,
    },
    /// Write every part of a message to its own file
    Split {
        path: PathBuf,
        #[arg(short = 't', long = "content-type")]
        content_type: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Build a message from a root body and attachment files
    Pack {
        root: PathBuf,
        /// Content type of the root body
        #[arg(long, default_value = "text/xml; charset=UTF-8")]
        root_type: String,
        /// Attachment file (repeatable)
        #[arg(short, long = "attach", value_name = "FILE")]
        attachments: Vec<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        /// Use XOP framing for the root part
        #[arg(long)]
        xop: bool,
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

    let mut config = mimespool::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level, &config);

    if let Some(threshold) = cli.threshold {
        config.spool.threshold = threshold;
    }
    if let Some(dir) = cli.spool_dir {
        config.spool.directory = Some(dir);
    }
    config.apply_properties(&parse_properties(&cli.properties)?)?;

    match cli.command {
        Commands::Inspect {
            path,
            content_type,
            json,
        } => cmd_inspect(&path, &content_type, json, &config),
        Commands::Split {
            path,
            content_type,
            output,
        } => cmd_split(&path, &content_type, &output, &config),
        Commands::Pack {
            root,
            root_type,
            attachments,
            output,
            xop,
        } => {
            config.encoder.xop |= xop;
            cmd_pack(&root, &root_type, &attachments, &output, &config)
        }
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Log to stderr, plus a plain-text file in the cache directory when it
/// can be created. `RUST_LOG` overrides `level`.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let log_path = mimespool::config::log_file_path(config);
    let file_layer = log_path
        .parent()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .zip(log_path.file_name())
        .map(|(dir, name)| {
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, name))
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

/// Turn `KEY=VALUE` arguments into a property map.
fn parse_properties(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    raw.iter()
        .map(|kv| {
            kv.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("Property must be KEY=VALUE: {kv}"))
        })
        .collect()
}

fn open_message(path: &Path, content_type: &str, config: &Config) -> anyhow::Result<mimespool::Message> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let file = BufReader::new(File::open(path)?);
    Ok(mimespool::decode(file, content_type, config)?)
}

/// Size and SHA-256 of the rest of a part body.
fn digest_part(part: &Part) -> anyhow::Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut body = part.body();
    let mut buf = [0u8; 16 * 1024];
    let mut size = 0u64;
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    let hash = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Ok((size, hash))
}

/// List the parts of a message.
fn cmd_inspect(path: &Path, content_type: &str, json: bool, config: &Config) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut message = open_message(path, content_type, config)?;

    let mut rows = vec![(message.root.clone(), digest_part(&message.root)?)];
    for part in message.attachments.iter() {
        let part = part?;
        let digest = digest_part(&part)?;
        rows.push((part, digest));
    }
    let elapsed = start.elapsed();

    if json {
        let parts: Vec<serde_json::Value> = rows
            .iter()
            .enumerate()
            .map(|(i, (part, (size, sha256)))| {
                serde_json::json!({
                    "index": i,
                    "root": i == 0,
                    "id": part.id(),
                    "content_type": part.content_type(),
                    "filename": part.filename(),
                    "size": size,
                    "sha256": sha256,
                    "headers": part.headers(),
                })
            })
            .collect();
        let out = serde_json::json!({
            "file": path.display().to_string(),
            "parts": parts,
            "elapsed_ms": elapsed.as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    use humansize::{format_size, BINARY};

    println!();
    println!("  {} part(s) in {}", rows.len(), path.display());
    println!();
    println!(
        "  {:<4} {:<36} {:<30} {:>10}  {}",
        "#", "Content-ID", "Content-Type", "Size", "SHA-256"
    );
    println!("  {}", "-".repeat(100));
    for (i, (part, (size, sha256))) in rows.iter().enumerate() {
        let id: String = part.id().chars().take(35).collect();
        let ct: String = part.content_type().chars().take(29).collect();
        println!(
            "  {:<4} {:<36} {:<30} {:>10}  {}",
            i,
            id,
            ct,
            format_size(*size, BINARY),
            &sha256[..16]
        );
    }
    println!();
    println!("  Decoded in {:.2?}", elapsed);
    Ok(())
}

/// Write every part of a message to `output`.
fn cmd_split(path: &Path, content_type: &str, output: &Path, config: &Config) -> anyhow::Result<()> {
    let mut message = open_message(path, content_type, config)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} Splitting {pos} part(s)")?);

    let paths = mimespool::export::files::save_message(&mut message, output, &|saved| {
        pb.set_position(saved as u64);
    })?;
    pb.finish_and_clear();

    for p in &paths {
        println!("  {}", p.display());
    }
    println!("  Wrote {} part(s) to {}", paths.len(), output.display());
    Ok(())
}

/// Encode a root body plus attachments and print the outer content type.
fn cmd_pack(
    root: &Path,
    root_type: &str,
    attachments: &[PathBuf],
    output: &Path,
    config: &Config,
) -> anyhow::Result<()> {
    if !root.exists() {
        anyhow::bail!("File not found: {}", root.display());
    }
    let mut writer = MultipartWriter::new(root_type, &config.encoder);
    let mut out = BufWriter::new(File::create(output)?);

    let pb = ProgressBar::new(attachments.len() as u64 + 1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Packing [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("#>-"),
    );

    writer.write_root(&mut out, &mut BufReader::new(File::open(root)?))?;
    pb.inc(1);
    for path in attachments {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let part = OutgoingPart::new(mimespool::model::part::DEFAULT_CONTENT_TYPE)
            .with_header("Content-Disposition", format!("attachment; filename=\"{name}\""));
        writer.write_attachment(&mut out, &part, &mut BufReader::new(File::open(path)?))?;
        pb.inc(1);
    }
    writer.finish(&mut out)?;
    out.flush()?;
    pb.finish_and_clear();

    println!("{}", writer.content_type());
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mimespool", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}
