use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{self, Read, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use fleet_sails::{
    build_heatmap, check_sail_limits, hull_stats, render_summary, sailmaker_trends, blues,
    Config, DeclarationRecord, DeclarationSession, DeclarationStore, FileStore, HeatmapGrid,
    KeyValueStore, LimitViolation, RecordStore, SailError, Slot, TextField,
};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use rayon::prelude::*;
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fleet sail heatmaps, analyses and regatta declarations", long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Sail registry JSON: a file path or http(s) URL (defaults to the published feed)
    #[arg(long, global = true, value_hint = ValueHint::AnyPath)]
    data: Option<String>,

    /// JSON file overriding configuration defaults
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-hull purchase heatmaps (CSV plus one image per hull)
    Heatmap(HeatmapArgs),
    /// Summary statistics per hull
    Stats(StatsArgs),
    /// Annual purchases per sailmaker across the fleet
    Trends(TrendsArgs),
    /// Check hulls against the class sail purchase limits
    Limits(LimitsArgs),
    /// Manage saved regatta sail declarations
    Declaration(DeclarationArgs),
}

#[derive(Parser, Debug)]
struct HeatmapArgs {
    /// Hulls to render (all hulls when omitted)
    hulls: Vec<String>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "heatmap.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Directory for the per-hull images
    #[arg(long, default_value = "heatmaps", value_hint = ValueHint::DirPath)]
    plot_dir: PathBuf,

    /// Write SVG instead of PNG images
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Disable image generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Parser, Debug)]
struct StatsArgs {
    /// Hulls to summarise (all hulls when omitted)
    hulls: Vec<String>,

    /// Print JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Parser, Debug)]
struct TrendsArgs {
    /// Sailmakers to include (comma separated; defaults from config)
    #[arg(long)]
    sailmakers: Option<String>,

    /// Include every sailmaker
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "sailmakers")]
    all: bool,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Optional chart path (`.svg` for SVG, PNG otherwise)
    #[arg(long, value_hint = ValueHint::FilePath)]
    plot: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct LimitsArgs {
    /// Optional CSV file to write violations to
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct DeclarationArgs {
    /// Directory holding saved declarations
    #[arg(long, default_value = ".sail-declarations", value_hint = ValueHint::DirPath)]
    store_dir: PathBuf,

    #[command(subcommand)]
    action: DeclarationAction,
}

#[derive(Subcommand, Debug)]
enum DeclarationAction {
    /// Create or update the declaration for a hull
    Save(SaveArgs),
    /// Print a saved declaration as JSON
    Load(HullArg),
    /// Render the printable declaration as HTML
    Print(PrintArgs),
    /// Show the certificates each slot can take
    Candidates(CandidatesArgs),
    /// List hulls with a saved declaration
    List,
}

#[derive(Parser, Debug)]
struct HullArg {
    /// Hull number
    hull: String,
}

#[derive(Parser, Debug, Default)]
struct SaveArgs {
    /// Hull number
    hull: String,

    #[arg(long)]
    owner: Option<String>,

    #[arg(long)]
    boat_name: Option<String>,

    #[arg(long)]
    email: Option<String>,

    #[arg(long)]
    mobile: Option<String>,

    /// Jib 1 certificate (empty clears the slot)
    #[arg(long)]
    jib1: Option<String>,

    /// Jib 2 certificate (empty clears the slot)
    #[arg(long)]
    jib2: Option<String>,

    /// Main certificate (empty clears the slot)
    #[arg(long)]
    main: Option<String>,

    /// Spinnaker 1 certificate (empty clears the slot)
    #[arg(long)]
    spinnaker1: Option<String>,

    /// Spinnaker 2 certificate (empty clears the slot)
    #[arg(long)]
    spinnaker2: Option<String>,

    #[arg(long)]
    spinnaker1_color: Option<String>,

    #[arg(long)]
    spinnaker2_color: Option<String>,
}

impl SaveArgs {
    fn text_values(&self) -> [(TextField, Option<&str>); 6] {
        [
            (TextField::Owner, self.owner.as_deref()),
            (TextField::BoatName, self.boat_name.as_deref()),
            (TextField::Email, self.email.as_deref()),
            (TextField::Mobile, self.mobile.as_deref()),
            (TextField::Spinnaker1Color, self.spinnaker1_color.as_deref()),
            (TextField::Spinnaker2Color, self.spinnaker2_color.as_deref()),
        ]
    }

    fn slot_values(&self) -> [(Slot, Option<&str>); 5] {
        [
            (Slot::Jib1, self.jib1.as_deref()),
            (Slot::Jib2, self.jib2.as_deref()),
            (Slot::Main, self.main.as_deref()),
            (Slot::Spinnaker1, self.spinnaker1.as_deref()),
            (Slot::Spinnaker2, self.spinnaker2.as_deref()),
        ]
    }
}

#[derive(Parser, Debug)]
struct PrintArgs {
    /// Hull number
    hull: String,

    /// Output HTML path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct CandidatesArgs {
    /// Hull number
    hull: String,

    /// Only show one slot
    #[arg(long, value_enum)]
    slot: Option<SlotOpt>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SlotOpt {
    Jib1,
    Jib2,
    Main,
    Spinnaker1,
    Spinnaker2,
}

impl From<SlotOpt> for Slot {
    fn from(value: SlotOpt) -> Self {
        match value {
            SlotOpt::Jib1 => Slot::Jib1,
            SlotOpt::Jib2 => Slot::Jib2,
            SlotOpt::Main => Slot::Main,
            SlotOpt::Spinnaker1 => Slot::Spinnaker1,
            SlotOpt::Spinnaker2 => Slot::Spinnaker2,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.source.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = load_config(cli.source.config.as_deref())?;
    let records = Arc::new(load_records(cli.source.data.as_deref(), &config)?);

    match cli.command {
        Command::Heatmap(args) => handle_heatmap(&records, args),
        Command::Stats(args) => handle_stats(&records, args),
        Command::Trends(args) => handle_trends(&records, &config, args),
        Command::Limits(args) => handle_limits(&records, args),
        Command::Declaration(args) => handle_declaration(records, &config, args),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Config::from_json(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn load_records(data: Option<&str>, config: &Config) -> Result<RecordStore> {
    let location = data.unwrap_or(config.data_url.as_str());
    let bytes = if is_url(location) {
        fetch(location).with_context(|| format!("failed to download {location}"))?
    } else {
        fs::read(location).with_context(|| format!("failed to read {location}"))?
    };
    let store = RecordStore::from_json(&bytes)
        .with_context(|| format!("failed to parse sail records from {location}"))?;
    info!("Loaded {} sail records from {}", store.len(), location);
    Ok(store)
}

fn fetch(url: &str) -> Result<Vec<u8>, SailError> {
    let response = ureq::get(url).call().map_err(|err| match err {
        ureq::Error::Status(status, _) => SailError::Fetch(format!("HTTP {status}")),
        ureq::Error::Transport(transport) => SailError::Fetch(transport.to_string()),
    })?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .map_err(|e| SailError::Fetch(e.to_string()))?;
    Ok(bytes)
}

fn selected_hulls(records: &RecordStore, requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return records.hulls();
    }
    requested
        .iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect()
}

fn csv_writer(path: &Path) -> Result<csv::Writer<Box<dyn Write>>> {
    let sink: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Box::new(file)
    };
    Ok(csv::Writer::from_writer(sink))
}

fn handle_heatmap(records: &RecordStore, args: HeatmapArgs) -> Result<()> {
    let mut grids = Vec::new();
    for hull in selected_hulls(records, &args.hulls) {
        match build_heatmap(records, &hull) {
            Some(grid) if grid.is_empty() => {
                warn!("Hull {hull} has no dated purchases; skipping");
            }
            Some(grid) => grids.push(grid),
            None => warn!("No data available for hull {hull}"),
        }
    }
    if grids.is_empty() {
        return Err(anyhow!("no heatmap data for the requested hulls"));
    }

    let mut writer = csv_writer(&args.output)?;
    write_heatmap_rows(&grids, &mut writer)?;
    writer.flush()?;
    if args.output.as_os_str() != "-" {
        info!("Wrote heatmap CSV: {}", args.output.display());
    }

    if args.no_plot {
        return Ok(());
    }
    fs::create_dir_all(&args.plot_dir)
        .with_context(|| format!("failed to create {}", args.plot_dir.display()))?;
    let kind = if args.svg { ChartKind::Svg } else { ChartKind::Png };
    let rendered: Vec<(PathBuf, Result<(), String>)> = grids
        .par_iter()
        .map(|grid| {
            let path = args
                .plot_dir
                .join(format!("hull_{}.{}", file_safe(&grid.hull), kind.extension()));
            let result = render_heatmap_guard(grid, &path, kind);
            (path, result)
        })
        .collect();
    for (path, result) in rendered {
        match result {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping render ({}): {}", path.display(), err),
        }
    }
    Ok(())
}

fn write_heatmap_rows<W: Write>(grids: &[HeatmapGrid], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["hull", "sail_type", "sailmaker", "label", "year", "count"])?;
    for grid in grids {
        for (row, key) in grid.keys.iter().enumerate() {
            for (col, year) in grid.years.iter().enumerate() {
                let count = grid.count_at(row, col);
                if count == 0 {
                    continue;
                }
                writer.write_record([
                    grid.hull.clone(),
                    key.sail_type.clone(),
                    key.sailmaker.clone(),
                    key.label(),
                    year.to_string(),
                    count.to_string(),
                ])?;
            }
        }
    }
    Ok(())
}

fn file_safe(hull: &str) -> String {
    hull.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("svg") => ChartKind::Svg,
            _ => ChartKind::Png,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

// Font loading inside the plotting backends can panic on hosts without the
// expected system fonts.
fn render_heatmap_guard(grid: &HeatmapGrid, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render =
        || -> Result<(), String> { render_heatmap(grid, path, kind).map_err(|e| format!("plotting error: {e}")) };
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn heatmap_size(grid: &HeatmapGrid) -> (u32, u32) {
    let cols = grid.columns().max(4) as u32;
    let rows = grid.rows().max(3) as u32;
    (260 + 70 * cols, 140 + 44 * rows)
}

fn render_heatmap(grid: &HeatmapGrid, path: &Path, kind: ChartKind) -> Result<()> {
    let size = heatmap_size(grid);
    match kind {
        ChartKind::Png => draw_heatmap(BitMapBackend::new(path, size).into_drawing_area(), grid),
        ChartKind::Svg => draw_heatmap(SVGBackend::new(path, size).into_drawing_area(), grid),
    }
}

fn draw_heatmap<DB>(root: DrawingArea<DB, Shift>, grid: &HeatmapGrid) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let cols = grid.columns() as i32;
    let rows = grid.rows() as i32;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Sail Purchases for Hull {}", grid.hull),
            ("sans-serif", 26),
        )
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 170)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d((0..cols).into_segmented(), (0..rows).into_segmented())?;

    // Row 0 is drawn at the top.
    let years = &grid.years;
    let keys = &grid.keys;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(grid.columns())
        .y_labels(grid.rows())
        .x_desc("Year")
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => usize::try_from(*i)
                .ok()
                .and_then(|i| years.get(i))
                .map(|y| y.to_string())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => usize::try_from(rows - 1 - *i)
                .ok()
                .and_then(|r| keys.get(r))
                .map(|k| k.label())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .label_style(("sans-serif", 15))
        .draw()?;

    let mut cells = Vec::with_capacity(grid.rows() * grid.columns());
    for row in 0..grid.rows() {
        for col in 0..grid.columns() {
            cells.push((rows - 1 - row as i32, col as i32, grid.count_at(row, col)));
        }
    }

    chart.draw_series(cells.iter().map(|&(y, x, count)| {
        let (r, g, b) = blues(grid.intensity(count));
        Rectangle::new(
            [
                (SegmentValue::Exact(x), SegmentValue::Exact(y)),
                (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
            ],
            RGBColor(r, g, b).filled(),
        )
    }))?;

    chart.draw_series(cells.iter().filter(|c| c.2 > 0).map(|&(y, x, count)| {
        let colour = if grid.needs_light_label(count) { WHITE } else { BLACK };
        let style = ("sans-serif", 16)
            .into_font()
            .color(&colour)
            .pos(Pos::new(HPos::Center, VPos::Center));
        Text::new(
            count.to_string(),
            (SegmentValue::CenterOf(x), SegmentValue::CenterOf(y)),
            style,
        )
    }))?;

    root.present()?;
    Ok(())
}

fn handle_stats(records: &RecordStore, args: StatsArgs) -> Result<()> {
    let mut rows = Vec::new();
    for hull in selected_hulls(records, &args.hulls) {
        if !records.has_hull(&hull) {
            warn!("No data available for hull {hull}");
            continue;
        }
        rows.push((hull.clone(), hull_stats(records.for_hull(&hull))));
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let value: Vec<_> = rows
            .iter()
            .map(|(hull, stats)| json!({ "hull": hull, "stats": stats }))
            .collect();
        serde_json::to_writer_pretty(&mut out, &value)?;
        writeln!(out)?;
        return Ok(());
    }

    for (hull, stats) in &rows {
        let range = match (stats.first_year, stats.last_year) {
            (Some(first), Some(last)) if first == last => first.to_string(),
            (Some(first), Some(last)) => format!("{first}-{last}"),
            _ => "undated".to_string(),
        };
        writeln!(out, "Hull {hull}: {} sails, {range}", stats.total_sails)?;
        writeln!(out, "  Sailmakers: {}", stats.sailmakers.join(", "))?;
        writeln!(out, "  Sail types: {}", stats.sail_types.join(", "))?;
    }
    Ok(())
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn handle_trends(records: &RecordStore, config: &Config, args: TrendsArgs) -> Result<()> {
    let filter = if args.all {
        Vec::new()
    } else {
        args.sailmakers
            .as_deref()
            .map(parse_list)
            .unwrap_or_else(|| config.trend_sailmakers.clone())
    };
    let trends = sailmaker_trends(records.records(), &filter);
    if trends.is_empty() {
        warn!("No dated purchases for the selected sailmakers");
        return Ok(());
    }

    let makers: Vec<String> = if filter.is_empty() {
        let mut all: Vec<String> = trends
            .values()
            .flat_map(|per_year| per_year.keys().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    } else {
        filter
    };

    let mut writer = csv_writer(&args.output)?;
    write_trend_rows(&trends, &makers, &mut writer)?;
    writer.flush()?;

    for maker in &makers {
        let total: u32 = trends.values().filter_map(|m| m.get(maker)).sum();
        info!("{maker}: {total} total purchases");
    }

    if let Some(path) = args.plot.as_ref() {
        let kind = ChartKind::for_path(path);
        let render = || -> Result<(), String> {
            render_trends(&trends, &makers, path, kind).map_err(|e| format!("plotting error: {e}"))
        };
        match panic::catch_unwind(panic::AssertUnwindSafe(render)) {
            Ok(Ok(())) => info!("Wrote plot: {}", path.display()),
            Ok(Err(err)) => warn!("Skipping render ({}): {}", path.display(), err),
            Err(_) => warn!("Skipping render ({}): plotting backend panicked", path.display()),
        }
    }
    Ok(())
}

fn write_trend_rows<W: Write>(
    trends: &BTreeMap<i32, BTreeMap<String, u32>>,
    makers: &[String],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut header = vec!["year".to_string()];
    header.extend(makers.iter().cloned());
    writer.write_record(&header)?;
    for (year, per_maker) in trends {
        let mut row = vec![year.to_string()];
        row.extend(
            makers
                .iter()
                .map(|m| per_maker.get(m).copied().unwrap_or(0).to_string()),
        );
        writer.write_record(&row)?;
    }
    Ok(())
}

fn render_trends(
    trends: &BTreeMap<i32, BTreeMap<String, u32>>,
    makers: &[String],
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    match kind {
        ChartKind::Png => draw_trends(
            BitMapBackend::new(path, (1280, 640)).into_drawing_area(),
            trends,
            makers,
        ),
        ChartKind::Svg => draw_trends(
            SVGBackend::new(path, (1280, 640)).into_drawing_area(),
            trends,
            makers,
        ),
    }
}

fn draw_trends<DB>(
    root: DrawingArea<DB, Shift>,
    trends: &BTreeMap<i32, BTreeMap<String, u32>>,
    makers: &[String],
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (Some(&first), Some(&last)) = (trends.keys().next(), trends.keys().next_back()) else {
        return Ok(());
    };
    let y_max = trends
        .values()
        .flat_map(|m| m.values())
        .copied()
        .max()
        .unwrap_or(0)
        + 1;

    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Annual Sail Purchases by Sailmaker", ("sans-serif", 26))
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 50)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(first..last + 1, 0u32..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Year")
        .y_desc("Number of Sails Purchased")
        .x_label_formatter(&|year| year.to_string())
        .light_line_style(&BLACK.mix(0.05))
        .draw()?;

    for (idx, maker) in makers.iter().enumerate() {
        let colour = Palette99::pick(idx).to_rgba();
        chart
            .draw_series(LineSeries::new(
                (first..=last).map(|year| {
                    let count = trends
                        .get(&year)
                        .and_then(|per_maker| per_maker.get(maker))
                        .copied()
                        .unwrap_or(0);
                    (year, count)
                }),
                colour.stroke_width(2),
            ))?
            .label(maker.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 24, y)], colour));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.85))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

fn handle_limits(records: &RecordStore, args: LimitsArgs) -> Result<()> {
    let violations = check_sail_limits(records.records());
    if violations.is_empty() {
        println!("No violations found (excluding Hull 0).");
        info!("No sail limit violations detected");
        return Ok(());
    }

    println!("Violations detected (excluding Hull 0):");
    for v in &violations {
        println!(
            "  Hull {:>4}  {:<9}  {} bought, {} allowed  {}",
            v.hull,
            v.period(),
            v.count,
            v.allowed,
            v.kind
        );
    }
    warn!("Found {} sail limit violations", violations.len());

    if let Some(path) = args.output.as_ref() {
        let mut writer = csv_writer(path)?;
        write_violation_rows(&violations, &mut writer)?;
        writer.flush()?;
        info!("Violations report saved to {}", path.display());
    }
    Ok(())
}

fn write_violation_rows<W: Write>(
    violations: &[LimitViolation],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(["hull", "year", "count", "allowed", "violation"])?;
    for v in violations {
        writer.write_record([
            v.hull.clone(),
            v.period(),
            v.count.to_string(),
            v.allowed.to_string(),
            v.kind.to_string(),
        ])?;
    }
    Ok(())
}

fn handle_declaration(
    records: Arc<RecordStore>,
    config: &Config,
    args: DeclarationArgs,
) -> Result<()> {
    let backend = FileStore::open(&args.store_dir)
        .with_context(|| format!("failed to open {}", args.store_dir.display()))?;
    let mut store = DeclarationStore::new(backend, config);

    match args.action {
        DeclarationAction::Save(save) => {
            let stored = save_declaration(records, config, &mut store, &save)?;
            println!(
                "Declaration for Hull {} saved successfully!",
                stored.hull_number
            );
        }
        DeclarationAction::Load(HullArg { hull }) => {
            let saved = load_saved(&store, &hull)?;
            if let Some(at) = saved.saved_at {
                info!(
                    "Declaration for Hull {} loaded (saved {})",
                    saved.hull_number,
                    at.format("%Y-%m-%d %H:%M UTC")
                );
            }
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        DeclarationAction::Print(print) => {
            let html = print_declaration(records, config, &store, &print.hull)?;
            if print.output.as_os_str() == "-" {
                io::stdout().lock().write_all(html.as_bytes())?;
            } else {
                fs::write(&print.output, html)
                    .with_context(|| format!("failed to write {}", print.output.display()))?;
                info!("Wrote declaration: {}", print.output.display());
            }
        }
        DeclarationAction::Candidates(args) => {
            let mut session = DeclarationSession::new(records, config);
            let outcome = session.set_hull(&args.hull);
            if let Some(warning) = outcome.warning() {
                bail!(warning);
            }
            let slots: Vec<Slot> = match args.slot {
                Some(slot) => vec![slot.into()],
                None => Slot::ALL.to_vec(),
            };
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for slot in slots {
                writeln!(out, "{}:", slot.label())?;
                let candidates = session.candidates(slot);
                if candidates.is_empty() {
                    writeln!(out, "  (none)")?;
                }
                for sail in candidates {
                    writeln!(
                        out,
                        "  {}  {}  {}",
                        sail.certificate_no,
                        sail.sailmaker,
                        sail.delivery_date.as_deref().unwrap_or("undated")
                    )?;
                }
            }
        }
        DeclarationAction::List => {
            for hull in store.saved_hulls()? {
                println!("{hull}");
            }
        }
    }
    Ok(())
}

fn load_saved<S: KeyValueStore>(
    store: &DeclarationStore<S>,
    hull: &str,
) -> Result<DeclarationRecord> {
    store
        .load(hull)?
        .ok_or_else(|| anyhow!("No saved declaration found for Hull {}.", hull.trim()))
}

/// Apply `args` on top of any saved declaration for the hull and persist it.
fn save_declaration<S: KeyValueStore>(
    records: Arc<RecordStore>,
    config: &Config,
    store: &mut DeclarationStore<S>,
    args: &SaveArgs,
) -> Result<DeclarationRecord> {
    let mut session = DeclarationSession::new(records, config);
    match store.load(&args.hull)? {
        Some(saved) => {
            let (_, skipped) = session.restore(&saved);
            for slot in skipped {
                warn!("Saved {} certificate is no longer available", slot.label());
            }
        }
        None => {
            if let Some(warning) = session.set_hull(&args.hull).warning() {
                warn!("{warning}");
            }
        }
    }

    for (field, value) in args.text_values() {
        if let Some(value) = value {
            session.set_text(field, value.trim());
        }
    }
    // Release every slot being reassigned first so certificates can move
    // between slots in one command.
    for (slot, value) in args.slot_values() {
        if value.is_some() {
            session.select_slot(slot, None)?;
        }
    }
    for (slot, value) in args.slot_values() {
        if let Some(cert) = value {
            session
                .select_slot(slot, Some(cert))
                .with_context(|| format!("cannot declare {} for hull {}", slot.label(), args.hull.trim()))?;
        }
    }

    for problem in session.validation_errors() {
        warn!("Declaration incomplete: {problem}");
    }
    debug!(selected = session.selected().len(), "saving declaration");
    Ok(store.save(session.record())?)
}

fn print_declaration<S: KeyValueStore>(
    records: Arc<RecordStore>,
    config: &Config,
    store: &DeclarationStore<S>,
    hull: &str,
) -> Result<String> {
    let saved = load_saved(store, hull)?;
    let mut session = DeclarationSession::new(records, config);
    let (outcome, skipped) = session.restore(&saved);
    if let Some(warning) = outcome.warning() {
        warn!("{warning}");
    }
    for slot in skipped {
        warn!("Saved {} certificate is no longer available", slot.label());
    }
    render_summary(&session, &config.event_name, Utc::now())
        .context("Please fix the following errors")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_sails::{MemoryStore, SailRecord};

    fn sail(hull: &str, cert: &str, sail_type: &str, date: &str) -> SailRecord {
        SailRecord {
            hull: hull.to_string(),
            sail_type: sail_type.to_string(),
            sailmaker: "North".to_string(),
            certificate_no: cert.to_string(),
            delivery_date: Some(date.to_string()),
            purchaser: "Pat Doe".to_string(),
            notes: None,
        }
    }

    fn registry() -> Arc<RecordStore> {
        Arc::new(RecordStore::new(vec![
            sail("12", "C100", "J", "2021-03-01"),
            sail("12", "C101", "J", "2020-03-01"),
            sail("12", "S1", "S89", "2022-06-01"),
            sail("12", "M1", "M", "2023-01-15"),
            sail("3", "C300", "J", "2019-01-01"),
        ]))
    }

    #[test]
    fn cli_parses_nested_declaration_commands() {
        let cli = Cli::try_parse_from([
            "fleet-sails",
            "--data",
            "sails.json",
            "declaration",
            "--store-dir",
            "/tmp/decl",
            "save",
            "12",
            "--jib1",
            "C100",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.source.verbose);
        assert_eq!(cli.source.data.as_deref(), Some("sails.json"));
        match cli.command {
            Command::Declaration(DeclarationArgs {
                action: DeclarationAction::Save(save),
                ..
            }) => {
                assert_eq!(save.hull, "12");
                assert_eq!(save.jib1.as_deref(), Some("C100"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["fleet-sails", "trends", "--all", "--sailmakers", "North"]).is_err());
    }

    #[test]
    fn helpers() {
        assert!(is_url("https://example.com/sails.json"));
        assert!(!is_url("data/sails.json"));
        assert_eq!(parse_list(" North, ,Quantum "), vec!["North", "Quantum"]);
        assert_eq!(file_safe("12/B"), "12_B");
        assert!(matches!(ChartKind::for_path(Path::new("a.SVG")), ChartKind::Svg));
        assert!(matches!(ChartKind::for_path(Path::new("a")), ChartKind::Png));
    }

    #[test]
    fn heatmap_csv_lists_non_empty_cells() {
        let records = registry();
        let grid = build_heatmap(&records, "12").unwrap();
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_heatmap_rows(&[grid], &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "hull,sail_type,sailmaker,label,year,count");
        assert_eq!(lines.len(), 5);
        assert!(lines.contains(&"12,J,North,J (North),2021,1"));
    }

    #[test]
    fn trend_csv_fills_missing_makers_with_zero() {
        let records = registry();
        let makers = vec!["North".to_string(), "Quantum".to_string()];
        let trends = sailmaker_trends(records.records(), &makers);
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_trend_rows(&trends, &makers, &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert!(text.starts_with("year,North,Quantum\n2019,1,0\n"));
    }

    #[test]
    fn save_merges_with_previous_declaration() {
        let config = Config::default();
        let mut store = DeclarationStore::new(MemoryStore::new(), &config);
        let first = SaveArgs {
            hull: "12".into(),
            boat_name: Some("Blue Note".into()),
            jib1: Some("C100".into()),
            ..Default::default()
        };
        let stored = save_declaration(registry(), &config, &mut store, &first).unwrap();
        assert_eq!(stored.owner, "Pat Doe");

        // Move C100 from jib1 to jib2 and fill jib1 with the older jib.
        let second = SaveArgs {
            hull: "12".into(),
            jib1: Some("C101".into()),
            jib2: Some("C100".into()),
            ..Default::default()
        };
        let stored = save_declaration(registry(), &config, &mut store, &second).unwrap();
        assert_eq!(stored.boat_name, "Blue Note");
        assert_eq!(stored.slots.get(Slot::Jib1), Some("C101"));
        assert_eq!(stored.slots.get(Slot::Jib2), Some("C100"));
    }

    #[test]
    fn save_rejects_certificates_from_other_hulls() {
        let config = Config::default();
        let mut store = DeclarationStore::new(MemoryStore::new(), &config);
        let args = SaveArgs {
            hull: "12".into(),
            jib1: Some("C300".into()),
            ..Default::default()
        };
        assert!(save_declaration(registry(), &config, &mut store, &args).is_err());
        assert!(store.saved_hulls().unwrap().is_empty());
    }

    #[test]
    fn print_requires_a_complete_saved_declaration() {
        let config = Config::default();
        let mut store = DeclarationStore::new(MemoryStore::new(), &config);
        assert!(print_declaration(registry(), &config, &store, "12").is_err());

        let args = SaveArgs {
            hull: "12".into(),
            ..Default::default()
        };
        save_declaration(registry(), &config, &mut store, &args).unwrap();
        let err = print_declaration(registry(), &config, &store, "12").unwrap_err();
        assert!(format!("{err:#}").contains("At least one sail must be selected"));

        let args = SaveArgs {
            hull: "12".into(),
            main: Some("M1".into()),
            ..Default::default()
        };
        save_declaration(registry(), &config, &mut store, &args).unwrap();
        let html = print_declaration(registry(), &config, &store, "12").unwrap();
        assert!(html.contains("<td>Main</td><td>M1</td>"));
        assert!(html.contains(&config.event_name));
    }

    #[test]
    fn declarations_survive_in_a_store_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::default();
        let backend = FileStore::open(tmp.path()).unwrap();
        let mut store = DeclarationStore::new(backend, &config);
        let args = SaveArgs {
            hull: "3".into(),
            jib1: Some("C300".into()),
            ..Default::default()
        };
        save_declaration(registry(), &config, &mut store, &args).unwrap();

        let reopened = DeclarationStore::new(FileStore::open(tmp.path()).unwrap(), &config);
        assert_eq!(reopened.saved_hulls().unwrap(), vec!["3"]);
        assert_eq!(
            load_saved(&reopened, "3").unwrap().slots.get(Slot::Jib1),
            Some("C300")
        );
        assert!(load_saved(&reopened, "4").is_err());
    }

    #[test]
    fn config_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"event_name": "Spring Series"}"#).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.event_name, "Spring Series");
        assert_eq!(config.storage_prefix, "sailDeclaration_");
        assert!(load_config(Some(&tmp.path().join("missing.json"))).is_err());
    }

    #[test]
    fn records_load_from_a_local_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sails.json");
        fs::write(
            &path,
            r#"[{"Hull": "12", "Sail Type": "J", "Sailmaker": "North", "Certificate No.": "C1"}]"#,
        )
        .unwrap();
        let store = load_records(path.to_str(), &Config::default()).unwrap();
        assert_eq!(store.len(), 1);
        fs::write(&path, "{}").unwrap();
        assert!(load_records(path.to_str(), &Config::default()).is_err());
    }
}
