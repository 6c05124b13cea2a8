use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use console::style;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use humansize::{BINARY, format_size};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chisel::config::DEFAULT_PROGRESS_INTERVAL;
use chisel::devices::{device_selection_options, discover_block_devices};
use chisel::recovery::{MANIFEST_FILE, recover_from};
use chisel::source::CHUNK_SIZE_MENU;
use chisel::{
    ArtifactReceipt, CancelFlag, CarveReport, ChunkCapacity, RecoveredFile, ScanConfig,
    ScanObserver, ScanSnapshot, SignatureDirectory, SinkFailurePolicy,
};

#[derive(Parser)]
#[command(name = "chisel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Carve deleted files out of raw devices and disk images by signature")]
struct Cli {
    /// Block device or image file to scan
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Directory for recovered files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File type to recover (see --list-types)
    #[arg(short = 't', long = "type")]
    file_type: Option<String>,

    /// Bytes read per chunk: 4096, 8192, 65536 or 1048576 (or menu position 1-4)
    #[arg(short, long)]
    chunk_size: Option<usize>,

    /// JSON scan configuration; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// What to do when a recovered file cannot be written
    #[arg(long, value_enum)]
    on_sink_error: Option<FailureArg>,

    /// Skip the chain-of-custody sidecars
    #[arg(long)]
    no_custody: bool,

    /// Replace files already present in the output directory
    #[arg(long)]
    overwrite: bool,

    /// Memory-map image files instead of reading them
    #[arg(long)]
    mmap: bool,

    /// Print the supported file types and exit
    #[arg(long)]
    list_types: bool,

    /// Never prompt; --source and --type become required
    #[arg(short = 'y', long)]
    yes: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailureArg {
    Abort,
    Skip,
}

impl From<FailureArg> for SinkFailurePolicy {
    fn from(arg: FailureArg) -> Self {
        match arg {
            FailureArg::Abort => SinkFailurePolicy::Abort,
            FailureArg::Skip => SinkFailurePolicy::Skip,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let directory = SignatureDirectory::with_defaults();

    if cli.list_types {
        println!("{}", style("Supported file types:").green().bold());
        for entry in directory.iter() {
            println!("  {}", entry);
        }
        return Ok(());
    }

    let cancel = CancelFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || handler_flag.cancel()).context("Failed to set Ctrl+C handler")?;

    let config = build_config(&cli, &directory)?;
    run_scan(&config, &directory, &cancel, cli.yes)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli, directory: &SignatureDirectory) -> Result<ScanConfig> {
    let mut config = match &cli.config {
        Some(path) => ScanConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => ScanConfig::default(),
    };
    let theme = ColorfulTheme::default();

    if let Some(source) = &cli.source {
        config.source = Some(source.clone());
    }
    if config.source.is_none() {
        if cli.yes {
            bail!("--source is required with --yes");
        }
        config.source = Some(select_source(&theme)?);
    }

    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }

    if let Some(file_type) = &cli.file_type {
        config.extension = Some(file_type.clone());
    }
    if config.extension.is_none() {
        if cli.yes {
            bail!("--type is required with --yes");
        }
        let extensions: Vec<&str> = directory.extensions().collect();
        let selection = Select::with_theme(&theme)
            .with_prompt("Enter the file type you want to search for")
            .items(&extensions)
            .default(0)
            .interact()
            .context("Failed to select file type")?;
        config.extension = Some(extensions[selection].to_string());
    }

    match cli.chunk_size {
        Some(value) => {
            let (capacity, substitution) = ChunkCapacity::from_menu_value(value);
            if let Some(warning) = substitution {
                println!("[!] {}", style(warning).yellow());
            }
            config.chunk_capacity = capacity.get();
        }
        None if cli.config.is_none() && !cli.yes => {
            let items: Vec<String> = CHUNK_SIZE_MENU
                .iter()
                .map(|bytes| format!("{} bytes", bytes))
                .collect();
            let selection = Select::with_theme(&theme)
                .with_prompt("Choose the chunk size")
                .items(&items)
                .default(0)
                .interact()
                .context("Failed to select chunk size")?;
            let (capacity, _) = ChunkCapacity::from_menu(selection + 1);
            config.chunk_capacity = capacity.get();
        }
        None => {}
    }

    if let Some(policy) = cli.on_sink_error {
        config.failure_policy = policy.into();
    }
    if cli.no_custody {
        config.custody = false;
    }
    config.overwrite |= cli.overwrite;
    config.use_mmap |= cli.mmap;
    if config.progress_interval == 0 {
        config.progress_interval = DEFAULT_PROGRESS_INTERVAL;
    }

    Ok(config)
}

fn select_source(theme: &ColorfulTheme) -> Result<PathBuf> {
    let devices = discover_block_devices();

    if devices.is_empty() {
        let path: String = Input::with_theme(theme)
            .with_prompt("Path of the device or image to scan")
            .interact_text()
            .context("Failed to read source path")?;
        return Ok(PathBuf::from(path));
    }

    println!(
        "{:<10} {:<8} {:>12} {}",
        style("NAME").bold(),
        style("TYPE").bold(),
        style("SIZE").bold(),
        style("PATH").bold()
    );
    println!("{}", "-".repeat(45));
    for device in &devices {
        println!(
            "{:<10} {:<8} {:>12} {}",
            device.name,
            device.device_type.to_string(),
            device.size_human(),
            device.path
        );
    }
    println!();

    let selection = Select::with_theme(theme)
        .with_prompt("Select device for analysis")
        .items(&device_selection_options(&devices))
        .default(0)
        .interact()
        .context("Failed to select device")?;

    Ok(PathBuf::from(&devices[selection].path))
}

fn run_scan(
    config: &ScanConfig,
    directory: &SignatureDirectory,
    cancel: &CancelFlag,
    skip_confirm: bool,
) -> Result<()> {
    let resolved = config.resolve(directory)?;
    if let Some(warning) = &resolved.capacity_warning {
        println!("[!] {}", style(warning).yellow());
    }

    let source_path = config.source.clone().unwrap_or_default();
    let mut source = config
        .open_source()
        .with_context(|| format!("Failed to open source: {}", source_path.display()))?;
    let source_size = source.size_hint();

    println!();
    println!("{}", style("Operation Summary:").cyan().bold());
    println!(
        "Source: {} ({})",
        source_path.display(),
        source_size.map_or_else(|| "unknown size".to_string(), |s| format_size(s, BINARY))
    );
    println!("Output: {}", config.output_dir.display());
    println!("Type:   {}", resolved.signature);
    println!("Chunk:  {} bytes", resolved.capacity.get());
    println!();

    if !skip_confirm {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Confirm and start scan?")
            .default(true)
            .interact()
            .context("Failed to confirm")?;
        if !confirmed {
            println!("\nOperation cancelled.");
            return Ok(());
        }
    }

    let observer = ProgressObserver::new(source_size, config.progress_interval);
    let bar = observer.bar.clone();

    let result = recover_from(config, resolved, &mut source, observer, cancel);
    bar.finish_and_clear();

    let report = result.context("Scan failed")?;
    print_summary(&report, config);
    Ok(())
}

/// Drives an indicatif bar and prints found/written lines above it.
struct ProgressObserver {
    bar: ProgressBar,
    interval: u64,
    next_report: u64,
}

impl ProgressObserver {
    fn new(source_size: Option<u64>, interval: u64) -> Self {
        let bar = match source_size {
            Some(size) => {
                let bar = ProgressBar::new(size);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                        .expect("invalid progress bar template - this is a bug")
                        .progress_chars("=>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("[{elapsed_precise}] {spinner} {bytes} {msg}")
                        .expect("invalid progress bar template - this is a bug"),
                );
                bar
            }
        };

        Self {
            bar,
            interval,
            next_report: interval,
        }
    }
}

impl ScanObserver for ProgressObserver {
    fn on_progress(&mut self, snapshot: &ScanSnapshot) {
        self.bar.set_position(snapshot.total_bytes_scanned);

        if snapshot.total_bytes_scanned >= self.next_report {
            while self.next_report <= snapshot.total_bytes_scanned {
                self.next_report += self.interval;
            }
            self.bar.println(format!(
                "Elapsed Time: {}  Scanned: {}",
                snapshot.elapsed_hms(),
                format_size(snapshot.total_bytes_scanned, BINARY)
            ));
        }
    }

    fn on_file_opened(&mut self, file: &RecoveredFile) {
        self.bar.println(format!(
            "==== Found {} at location: 0x{:X} ====",
            file.extension.to_uppercase(),
            file.start_offset
        ));
        self.bar.set_message(format!("file #{}", file.id));
    }

    fn on_file_closed(&mut self, file: &RecoveredFile, receipt: Option<&ArtifactReceipt>) {
        let line = match (receipt.and_then(|r| r.path.as_ref()), file.truncated) {
            (Some(path), false) => format!(
                "==== Wrote {} to location: {} ====",
                file.extension.to_uppercase(),
                path.display()
            ),
            (Some(path), true) => format!(
                "==== Wrote truncated {} to location: {} ====",
                file.extension.to_uppercase(),
                path.display()
            ),
            (None, _) => format!("[!] Could not write file #{}", file.id),
        };
        self.bar.println(line);
        self.bar.set_message("");
    }
}

fn print_summary(report: &CarveReport, config: &ScanConfig) {
    println!();
    println!("╔════════════════════════════════════════╗");
    if report.cancelled {
        println!("║       === Scan Interrupted ===         ║");
    } else {
        println!("║         === Scan Finished ===          ║");
    }
    println!("╠════════════════════════════════════════╣");
    println!("║ Elapsed Time:       {:>18} ║", report.session.elapsed_hms());
    println!(
        "║ Scanned Space:      {:>18} ║",
        format_size(report.session.total_bytes_scanned, BINARY)
    );
    println!("║ Complete Files:     {:>18} ║", report.complete_count());
    println!("║ Truncated Files:    {:>18} ║", report.truncated_count());
    println!("║ Write Failures:     {:>18} ║", report.failures.len());
    println!("╚════════════════════════════════════════╝");
    println!("Files saved to: {}", config.output_dir.display());
    println!(
        "Manifest:       {}",
        config.output_dir.join(MANIFEST_FILE).display()
    );
}
