use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use printkit_printing::audit;
use printkit_printing::render::content_transform;
use printkit_printing::{
    CancellationToken, Diagnostics, Dpi, NativeCapability, PageRange, PageSettings,
    PrintManager, PrintSession, PrintSessionBuilder, PrintingConfig, SceneDescription, Size,
    Thickness,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "printkit",
    about = "Paginate, preview and export printable scenes",
    author,
    version
)]
struct Cli {
    /// 列印設定檔（JSON）。 / Printing configuration file (JSON).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 將場景匯出為 PDF。 / Export a scene as a PDF document.
    Pdf(PdfArgs),
    /// 將每一頁繪製為 PNG 預覽。 / Render every page to a PNG preview.
    Preview(PreviewArgs),
    /// 輸出分頁後的頁面度量。 / Print the page metrics produced by pagination.
    Metrics(MetricsArgs),
    /// 輸出每個節點的繪製稽核資料。 / Print the render audit of every node.
    Audit(AuditArgs),
}

#[derive(Args)]
struct PageArgs {
    /// 場景描述檔（JSON）。 / Scene description (JSON).
    #[arg(value_name = "SCENE")]
    scene: PathBuf,

    /// 頁面大小（DIP），例如 816x1056。 / Page size in DIP, e.g. 816x1056.
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    page_size: Option<Size>,

    /// 四邊邊界（DIP）。 / Margin on every side, in DIP.
    #[arg(long, value_name = "N")]
    margin: Option<f64>,

    /// 內容縮放比例。 / Content scale factor.
    #[arg(long, value_name = "S")]
    scale: Option<f64>,

    /// 列印頁碼範圍，例如 2-4。 / Page range to print, e.g. 2-4.
    #[arg(long, value_name = "A-B", value_parser = parse_range)]
    range: Option<(u32, u32)>,

    /// 工作說明。 / Job description.
    #[arg(long, value_name = "TEXT")]
    description: Option<String>,
}

#[derive(Args)]
struct PdfArgs {
    #[command(flatten)]
    page: PageArgs,

    /// 輸出 PDF 路徑。 / Output PDF path.
    #[arg(long, short, value_name = "FILE")]
    output: PathBuf,
}

#[derive(Args)]
struct PreviewArgs {
    #[command(flatten)]
    page: PageArgs,

    /// 預覽圖片輸出資料夾。 / Directory receiving one PNG per page.
    #[arg(long, value_name = "DIR")]
    output_dir: PathBuf,

    /// 預覽解析度；預設沿用設定檔。 / Preview resolution; defaults to the configuration.
    #[arg(long, value_name = "N")]
    dpi: Option<f64>,
}

#[derive(Args)]
struct MetricsArgs {
    #[command(flatten)]
    page: PageArgs,

    /// 計算度量時的解析度；預設為列印解析度。 / Resolution for the metrics; defaults to the print DPI.
    #[arg(long, value_name = "N")]
    dpi: Option<f64>,
}

#[derive(Args)]
struct AuditArgs {
    #[command(flatten)]
    page: PageArgs,

    /// 以場景座標輸出，而非第一頁的頁面座標。 / Report scene coordinates instead of first-page coordinates.
    #[arg(long)]
    scene_space: bool,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let Cli { config, command } = Cli::parse();
    let config = load_config(config.as_deref())?;
    match command {
        Commands::Pdf(args) => execute_pdf(args, config),
        Commands::Preview(args) => execute_preview(args, config),
        Commands::Metrics(args) => execute_metrics(args, config),
        Commands::Audit(args) => execute_audit(args, config),
    }
}

fn load_config(path: Option<&Path>) -> Result<PrintingConfig> {
    let config = match path {
        Some(path) => PrintingConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display()))?,
        None => PrintingConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn manager(config: PrintingConfig) -> PrintManager {
    PrintManager::new(config, Diagnostics::new(), NativeCapability::probe())
}

fn execute_pdf(args: PdfArgs, config: PrintingConfig) -> Result<()> {
    let session = build_session(&args.page, &config)?;
    let result = manager(config)
        .export_pdf(&session, &args.output, &CancellationToken::new())
        .with_context(|| format!("failed to export {}", args.output.display()))?;
    println!(
        "Exported {} page(s) to {}",
        result.page_count,
        args.output.display()
    );
    Ok(())
}

fn execute_preview(args: PreviewArgs, mut config: PrintingConfig) -> Result<()> {
    if let Some(dpi) = args.dpi {
        config.preview_dpi = parse_dpi(dpi)?;
    }
    let session = build_session(&args.page, &config)?;
    let preview = manager(config)
        .create_preview(&session, &CancellationToken::new())
        .context("failed to render preview")?;

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    for index in 0..preview.len() {
        let png = preview
            .png(index)
            .ok_or_else(|| anyhow!("preview page {} is missing", index + 1))?
            .with_context(|| format!("failed to encode page {}", index + 1))?;
        let path = args.output_dir.join(format!("page-{:03}.png", index + 1));
        fs::write(&path, png).with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }
    Ok(())
}

fn execute_metrics(args: MetricsArgs, config: PrintingConfig) -> Result<()> {
    let dpi = match args.dpi {
        Some(dpi) => parse_dpi(dpi)?,
        None => config.print_dpi,
    };
    let session = build_session(&args.page, &config)?;
    let result = manager(config)
        .paginate(&session, dpi, &CancellationToken::new())
        .context("failed to paginate scene")?;

    let pages: Vec<Value> = result
        .pages
        .iter()
        .enumerate()
        .map(|(index, page)| {
            json!({
                "index": index,
                "tag": page.tag(),
                "page_break_after": page.page_break_after,
                "metrics": page.metrics(),
            })
        })
        .collect();
    print_json(&json!({ "summary": result.summary, "pages": pages }))
}

fn execute_audit(args: AuditArgs, config: PrintingConfig) -> Result<()> {
    let records = if args.scene_space {
        let visual = read_scene(&args.page.scene)?.into_visual();
        audit::collect(visual.as_ref())
    } else {
        let session = build_session(&args.page, &config)?;
        let result = manager(config)
            .paginate(&session, Dpi::LOGICAL, &CancellationToken::new())
            .context("failed to paginate scene")?;
        let page = result
            .pages
            .first()
            .ok_or_else(|| anyhow!("the scene produced no pages"))?;
        audit::collect_from(page.visual.as_ref(), content_transform(page.metrics()))
    };
    print_json(&serde_json::to_value(records)?)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_scene(path: &Path) -> Result<SceneDescription> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let scene = SceneDescription::from_json_str(&text)
        .with_context(|| format!("failed to parse scene {}", path.display()))?;
    tracing::debug!(scene = %path.display(), children = scene.children.len(), "loaded scene");
    Ok(scene)
}

fn build_session(args: &PageArgs, config: &PrintingConfig) -> Result<PrintSession> {
    let visual = read_scene(&args.scene)?.into_visual();
    let mut settings = PageSettings::default()
        .with_target_size(args.page_size.unwrap_or(config.default_page_size))
        .with_margins(
            args.margin
                .map(Thickness::uniform)
                .unwrap_or(config.default_margins),
        );
    if let Some(scale) = args.scale {
        if !(scale.is_finite() && scale > 0.0) {
            bail!("--scale must be a positive number");
        }
        settings = settings.with_scale(scale);
    }
    let range = args
        .range
        .map(|(start, end)| PageRange::new(start, end))
        .transpose()
        .context("invalid --range")?;

    let session = PrintSessionBuilder::new()
        .add_visual(visual, Some(settings))
        .configure_options(move |options| {
            options.show_dialog = false;
            options.page_range = range;
        })
        .build(args.description.clone())
        .context("failed to build print session")?;
    Ok(session)
}

fn parse_dpi(value: f64) -> Result<Dpi> {
    if !(value.is_finite() && value > 0.0) {
        bail!("--dpi must be a positive number");
    }
    Ok(Dpi::uniform(value))
}

fn parse_size(value: &str) -> Result<Size, String> {
    let (width, height) = value
        .split_once(|c: char| c.eq_ignore_ascii_case(&'x'))
        .ok_or_else(|| format!("expected WxH, got '{value}'"))?;
    let width: f64 = width
        .trim()
        .parse()
        .map_err(|_| format!("invalid width '{width}'"))?;
    let height: f64 = height
        .trim()
        .parse()
        .map_err(|_| format!("invalid height '{height}'"))?;
    if width <= 0.0 || height <= 0.0 {
        return Err("page size must be positive".into());
    }
    Ok(Size::new(width, height))
}

fn parse_range(value: &str) -> Result<(u32, u32), String> {
    let (start, end) = match value.split_once('-') {
        Some((start, end)) => (start, end),
        None => (value, value),
    };
    let start: u32 = start
        .trim()
        .parse()
        .map_err(|_| format!("invalid first page '{start}'"))?;
    let end: u32 = end
        .trim()
        .parse()
        .map_err(|_| format!("invalid last page '{end}'"))?;
    Ok((start, end))
}
