use anyhow::{Context, bail};
use clap::Parser;
use easyeda_convertlib::{
    BatchEvent, BatchExporter, ExportConfig, ExportOptions, ExportRequest, KicadVersion, Outcome,
    api::EasyedaApi,
};
use regex::Regex;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "easyeda-convertlib")]
#[command(version)]
#[command(about = "Convert EasyEDA/LCSC components into KiCad libraries", long_about = None)]
struct Cli {
    /// LCSC component ID or product URL (e.g., C2040)
    #[arg(long, value_name = "ID", conflicts_with = "batch")]
    lcsc_id: Option<String>,

    /// Read LCSC IDs from a file (every C<digits> token is used)
    #[arg(long, value_name = "FILE", conflicts_with = "lcsc_id")]
    batch: Option<PathBuf>,

    /// Export the schematic symbol
    #[arg(long)]
    symbol: bool,

    /// Export the footprint
    #[arg(long)]
    footprint: bool,

    /// Export the 3D model
    #[arg(long = "3d")]
    model_3d: bool,

    /// Download the datasheet
    #[arg(long)]
    datasheet: bool,

    /// Export symbol, footprint, 3D model and datasheet
    #[arg(long)]
    full: bool,

    /// Output directory path
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Library file prefix
    #[arg(long, value_name = "NAME")]
    prefix: Option<String>,

    /// Use KiCad v5 legacy format
    #[arg(long)]
    v5: bool,

    /// Overwrite existing components
    #[arg(long)]
    overwrite: bool,

    /// Reference 3D models through ${KIPRJMOD}
    #[arg(long)]
    project_relative: bool,

    /// Number of components processed in parallel
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// JSON configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn component_ids(&self) -> anyhow::Result<Vec<String>> {
        if let Some(id) = &self.lcsc_id {
            return Ok(vec![id.clone()]);
        }
        let Some(batch_file) = &self.batch else {
            bail!("Either --lcsc-id or --batch must be specified");
        };
        let content = std::fs::read_to_string(batch_file)
            .with_context(|| format!("Failed to open batch file {}", batch_file.display()))?;
        let re = Regex::new(r"C\d+")?;
        let ids: Vec<String> = re
            .find_iter(&content)
            .map(|m| m.as_str().to_string())
            .collect();
        if ids.is_empty() {
            bail!("No valid LCSC IDs found in {}", batch_file.display());
        }
        log::info!("Loaded {} LCSC IDs from batch file", ids.len());
        Ok(ids)
    }

    fn options(&self, config: &ExportConfig) -> anyhow::Result<ExportOptions> {
        let options = ExportOptions {
            symbol: self.symbol || self.full,
            footprint: self.footprint || self.full,
            model3d: self.model_3d || self.full,
            datasheet: self.datasheet || self.full,
            overwrite: self.overwrite,
            kicad_version: if self.v5 {
                KicadVersion::V5
            } else {
                config.kicad_version
            },
            project_relative_models: self.project_relative || config.project_relative_models,
        };
        if !(options.symbol || options.footprint || options.model3d || options.datasheet) {
            bail!("At least one of --symbol, --footprint, --3d, --datasheet or --full is required");
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} easyeda-convertlib] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

/// Returns whether at least one component was fully exported.
async fn run(args: Cli) -> anyhow::Result<bool> {
    let mut config = match &args.config {
        Some(path) => ExportConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExportConfig::default(),
    };
    if let Some(n) = args.parallel {
        config.pool_cap = n;
    }

    let request = ExportRequest {
        component_ids: args.component_ids()?,
        options: args.options(&config)?,
        export_path: args.output.clone(),
        file_prefix: args.prefix.clone(),
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let BatchEvent::Completed(result) = event {
                match serde_json::to_string(&result) {
                    Ok(line) => println!("{line}"),
                    Err(e) => log::error!("Cannot serialize result: {e}"),
                }
            }
        }
    });

    let api = EasyedaApi::new(config.fetch.clone())?;
    let exporter = BatchExporter::new(api)
        .with_pool_cap(config.pool_cap)
        .with_events(tx);
    let report = exporter.export(request).await?;
    // Dropping the exporter closes the channel so the printer drains and exits
    drop(exporter);
    printer.await?;

    log::info!(
        "{}/{} components exported ({} partial, {} failed)",
        report.success_count,
        report.total,
        report.partial_count,
        report.failure_count
    );
    Ok(report
        .results
        .iter()
        .any(|r| r.success == Outcome::Success))
}
