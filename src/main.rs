//! # charconv CLI - Character Set Converter
//!
//! Command-line front end for converting files between character sets
//! through the platform iconv engine.

#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::io::{self, Read, Write};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use charconv::{Category, Encoding, Error as ConvertError, Iconv, StreamingConverter};
#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use serde::Serialize;
#[cfg(feature = "cli")]
use tracing::{debug, info};
#[cfg(feature = "cli")]
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// charconv: convert text between character sets
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "charconv")]
#[command(version, about, long_about = None)]
#[command(author = "charconv Contributors")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Convert files between character sets
    Convert(ConvertArgs),

    /// Check that a file is valid in a character set
    Validate(ValidateArgs),

    /// List well-known character sets
    List(ListArgs),
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ConvertArgs {
    /// Source charset
    #[arg(short = 'f', long = "from")]
    from: String,

    /// Target charset
    #[arg(short = 't', long = "to")]
    to: String,

    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Convert in-place (overwrite input file)
    #[arg(long, conflicts_with = "output")]
    in_place: bool,

    /// Approximate characters the target charset cannot represent
    #[arg(long)]
    translit: bool,

    /// Strip BOM from input
    #[arg(long)]
    strip_bom: bool,

    /// Add BOM to output
    #[arg(long)]
    add_bom: bool,

    /// Read size for large files (KB)
    #[arg(long, default_value = "64")]
    buffer_size: usize,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ValidateArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Expected charset
    #[arg(short, long)]
    encoding: String,

    /// Show position of first error
    #[arg(long)]
    show_errors: bool,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ListArgs {
    /// Filter by category (unicode, ascii, iso, windows, ebcdic, dos, mac, asian)
    #[arg(short, long)]
    category: Option<String>,

    /// Show only charsets the local engine can open
    #[arg(long)]
    available: bool,

    /// Show charset details
    #[arg(long)]
    details: bool,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionResult {
    success: bool,
    from: String,
    to: String,
    bytes_processed: usize,
    bytes_written: usize,
    errors: Vec<String>,
    processing_time_ms: u64,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    encoding: String,
    bytes_checked: usize,
    error_offset: Option<usize>,
    error: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct CharsetInfo {
    name: &'static str,
    category: Category,
    description: &'static str,
    multibyte: bool,
    stateful: bool,
    bom: Option<String>,
    available: bool,
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Convert(ref args) => convert_command(args, &cli)?,
        Commands::Validate(ref args) => validate_command(args, &cli)?,
        Commands::List(ref args) => list_command(args, &cli)?,
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn open_input(path: Option<&PathBuf>) -> Result<Box<dyn Read>> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "reading input file");
            let file = fs::File::open(path)
                .with_context(|| format!("Failed to open input file: {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => {
            debug!("reading from stdin");
            Ok(Box::new(io::stdin()))
        }
    }
}

#[cfg(feature = "cli")]
fn read_all(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    open_input(path)?
        .read_to_end(&mut buffer)
        .context("Failed to read input")?;
    Ok(buffer)
}

#[cfg(feature = "cli")]
fn bom_of(charset: &str) -> Option<&'static [u8]> {
    charconv::iconv::base_name(charset)
        .parse::<Encoding>()
        .ok()
        .and_then(Encoding::bom)
}

/// Read the first `bom.len()` bytes, however many reads that takes, and
/// return them unless they are exactly the BOM.
#[cfg(feature = "cli")]
fn strip_leading_bom<R: Read>(reader: &mut R, bom: &[u8]) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(bom.len());
    reader
        .by_ref()
        .take(bom.len() as u64)
        .read_to_end(&mut head)?;
    if head == bom {
        debug!(len = bom.len(), "stripped BOM");
        head.clear();
    }
    Ok(head)
}

#[cfg(feature = "cli")]
fn convert_command(args: &ConvertArgs, cli: &Cli) -> Result<()> {
    let start_time = std::time::Instant::now();

    let from = charconv::resolve_charset(&args.from);
    let mut to = charconv::resolve_charset(&args.to);
    if args.translit {
        to = charconv::iconv::with_translit(&to);
    }
    info!(%from, %to, "converting");

    let mut converter = StreamingConverter::with_default_buffer(&to, &from)
        .with_context(|| format!("Failed to open converter from {} to {}", from, to))?;

    let mut reader = open_input(args.input.as_ref())?;
    let mut piece = vec![0u8; args.buffer_size.max(1) * 1024];
    let mut output_data = Vec::new();
    let mut bytes_processed = 0;

    // Handle BOM stripping
    if let Some(bom) = bom_of(&from).filter(|_| args.strip_bom) {
        let head = strip_leading_bom(&mut reader, bom).context("Failed to read input")?;
        bytes_processed += head.len();
        let converted = converter
            .feed(&head)
            .with_context(|| format!("Conversion from {} to {} failed", from, to))?;
        output_data.extend(converted);
    }

    loop {
        let n = reader.read(&mut piece).context("Failed to read input")?;
        if n == 0 {
            break;
        }
        let data = &piece[..n];

        bytes_processed += data.len();
        let converted = converter
            .feed(data)
            .with_context(|| format!("Conversion from {} to {} failed", from, to))?;
        output_data.extend(converted);
    }
    output_data.extend(converter.finish().context("Conversion failed")?);

    // Handle BOM addition
    let final_data = match bom_of(&to) {
        Some(bom) if args.add_bom => {
            let mut result = bom.to_vec();
            result.extend(output_data);
            result
        }
        _ => output_data,
    };

    // Write output
    if args.in_place {
        if let Some(ref input_path) = args.input {
            fs::write(input_path, &final_data).with_context(|| {
                format!("Failed to write to input file: {}", input_path.display())
            })?;
            info!(path = %input_path.display(), "updated file in-place");
        } else {
            anyhow::bail!("Cannot use --in-place without input file");
        }
    } else if let Some(ref output_path) = args.output {
        fs::write(output_path, &final_data)
            .with_context(|| format!("Failed to write output file: {}", output_path.display()))?;
        info!(path = %output_path.display(), "wrote output");
    } else {
        io::stdout()
            .write_all(&final_data)
            .context("Failed to write to stdout")?;
    }

    let processing_time = start_time.elapsed();
    info!(
        bytes_processed,
        bytes_written = final_data.len(),
        elapsed = ?processing_time,
        "conversion finished"
    );

    match cli.format {
        OutputFormat::Json => {
            let result = ConversionResult {
                success: true,
                from,
                to,
                bytes_processed,
                bytes_written: final_data.len(),
                errors: Vec::new(),
                processing_time_ms: processing_time.as_millis() as u64,
            };
            eprintln!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            if cli.verbose || args.output.is_none() {
                eprintln!("✓ Conversion completed successfully");
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn validate_command(args: &ValidateArgs, cli: &Cli) -> Result<()> {
    let encoding = charconv::resolve_charset(&args.encoding);
    let input_data = read_all(args.input.as_ref())?;

    // Converting to UTF-8 validates the source
    let outcome = match charconv::convert(&input_data, "UTF-8", &encoding) {
        Err(e @ ConvertError::UnsupportedCharset { .. }) => {
            let context = format!("Cannot validate {}", encoding);
            return Err(anyhow::Error::new(e).context(context));
        }
        other => other,
    };

    let (valid, error_offset, error) = match &outcome {
        Ok(_) => (true, None, None),
        // The input converted fully; only the handle release failed.
        Err(e @ ConvertError::Release { .. }) => (true, None, Some(e.to_string())),
        Err(e) => (false, e.offset(), Some(e.to_string())),
    };

    match cli.format {
        OutputFormat::Json => {
            let result = ValidationResult {
                valid,
                encoding: encoding.clone(),
                bytes_checked: input_data.len(),
                error_offset,
                error,
            };
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            if valid {
                println!("✓ File is valid {}", encoding);
            } else {
                println!("✗ File is not valid {}", encoding);
                if args.show_errors {
                    match (error_offset, &error) {
                        (Some(position), Some(e)) => {
                            let byte = input_data.get(position).copied().unwrap_or_default();
                            println!(
                                "  Error at position {}: byte 0x{:02X} ({})",
                                position, byte, e
                            );
                        }
                        (None, Some(e)) => println!("  Error: {}", e),
                        _ => {}
                    }
                }
            }
        }
    }

    std::process::exit(if valid { 0 } else { 1 });
}

#[cfg(feature = "cli")]
fn probe(encoding: Encoding) -> bool {
    match Iconv::open("UTF-8", encoding.name()) {
        Ok(cd) => cd.close().is_ok(),
        Err(e) => {
            debug!(charset = encoding.name(), error = %e, "charset not available");
            false
        }
    }
}

#[cfg(feature = "cli")]
fn list_command(args: &ListArgs, cli: &Cli) -> Result<()> {
    if let Some(ref filter_cat) = args.category {
        let known = Encoding::ALL
            .iter()
            .any(|encoding| encoding.category().name() == filter_cat.as_str());
        if !known {
            anyhow::bail!("Unknown category: {}", filter_cat);
        }
    }

    let charsets: Vec<CharsetInfo> = Encoding::ALL
        .iter()
        .filter(|encoding| {
            args.category
                .as_deref()
                .is_none_or(|category| encoding.category().name() == category)
        })
        .map(|&encoding| CharsetInfo {
            name: encoding.name(),
            category: encoding.category(),
            description: encoding.description(),
            multibyte: encoding.is_multibyte(),
            stateful: encoding.is_stateful(),
            bom: encoding.bom().map(|b| format!("{:02X?}", b)),
            available: probe(encoding),
        })
        .filter(|info| !args.available || info.available)
        .collect();

    match cli.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&charsets)?);
        }
        OutputFormat::Text => {
            println!("Character sets ({} total):", charsets.len());
            println!();

            for info in &charsets {
                println!(
                    "{:15} {:10} {}{}",
                    info.name,
                    format!("[{}]", info.category.name()),
                    info.description,
                    if info.available { "" } else { " (unavailable)" }
                );

                if args.details {
                    println!(
                        "                Multibyte: {}",
                        if info.multibyte { "Yes" } else { "No" }
                    );
                    println!(
                        "                Stateful: {}",
                        if info.stateful { "Yes" } else { "No" }
                    );
                    if let Some(ref bom) = info.bom {
                        println!("                BOM: {}", bom);
                    }
                    println!();
                }
            }
        }
    }

    Ok(())
}
