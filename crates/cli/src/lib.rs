use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use doc_model::{Preferences, StrokeScript, Tool};
use inkpaper_core::{encode_png, Workspace};
use pdf_engine::{default_engine, LopdfEngine, OpenSource, PdfEngine};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use storage::Storage;

/// Overrides the directory preferences are read from.
pub const DATA_DIR_ENV: &str = "INKPAPER_DATA_DIR";

#[derive(Debug, Parser)]
#[command(name = "inkpaper-cli")]
#[command(about = "InkPaper CLI")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF page information.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Flatten a stroke script into a copy of a PDF.
    Export {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// JSON stroke script with per-page stroke lists.
        #[arg(long, value_name = "STROKES")]
        strokes: PathBuf,
        /// Logical page width the strokes were drawn at.
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Render page 1 of a PDF, or the whiteboard when no file is given, with its strokes.
    Snapshot {
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
        #[arg(long, value_name = "STROKES")]
        strokes: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the stored preferences, updating them first when any flag is given.
    Prefs {
        #[arg(long, value_enum)]
        tool: Option<ToolArg>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        line_width: Option<f32>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        dpr: Option<f32>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ToolArg {
    Pen,
    Eraser,
}

impl From<ToolArg> for Tool {
    fn from(tool: ToolArg) -> Self {
        match tool {
            ToolArg::Pen => Tool::Pen,
            ToolArg::Eraser => Tool::Eraser,
        }
    }
}

#[derive(Debug, Default)]
struct PrefsUpdate {
    tool: Option<ToolArg>,
    color: Option<String>,
    line_width: Option<f32>,
    width: Option<u32>,
    dpr: Option<f32>,
}

impl PrefsUpdate {
    fn is_empty(&self) -> bool {
        self.tool.is_none()
            && self.color.is_none()
            && self.line_width.is_none()
            && self.width.is_none()
            && self.dpr.is_none()
    }

    fn apply(self, preferences: &mut Preferences) {
        if let Some(tool) = self.tool {
            preferences.tool.tool = tool.into();
        }
        if let Some(color) = self.color {
            preferences.tool.color = color;
        }
        if let Some(line_width) = self.line_width {
            preferences.tool.line_width = line_width;
        }
        if let Some(width) = self.width {
            preferences.page_render_width = width;
        }
        if let Some(dpr) = self.dpr {
            preferences.device_pixel_ratio = dpr;
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    pages: Vec<PageOutput>,
}

#[derive(Debug, Serialize)]
struct PageOutput {
    page: u32,
    width_pt: f32,
    height_pt: f32,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Export { file, strokes, width, output } => {
            run_export(&file, &strokes, width, output.as_deref())
        }
        Commands::Snapshot { file, strokes, width, output } => {
            run_snapshot(file.as_deref(), strokes.as_deref(), width, output.as_deref())
        }
        Commands::Prefs { tool, color, line_width, width, dpr } => {
            run_prefs(PrefsUpdate { tool, color, line_width, width, dpr })
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let mut pages = Vec::with_capacity(page_count as usize);
    for page in 1..=page_count {
        let size = engine.page_size(handle, page)?;
        pages.push(PageOutput { page, width_pt: size.width_pt, height_pt: size.height_pt });
    }

    let payload = InfoOutput { path: file.display().to_string(), page_count, pages };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close(handle)?;

    Ok(())
}

fn run_export(
    file: &Path,
    strokes: &Path,
    width: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    ensure_file_exists(file)?;
    let script = load_script(strokes)?;

    let mut workspace = open_workspace(file, width)?;
    apply_page_strokes(&mut workspace, &script)?;

    let bytes = workspace.export_pdf().context("failed to export PDF")?;

    let output = output
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| sibling_output(file, "annotated", "pdf"));
    write_atomically(&output, &bytes)?;

    println!("{}", output.display());
    Ok(())
}

fn run_snapshot(
    file: Option<&Path>,
    strokes: Option<&Path>,
    width: Option<u32>,
    output: Option<&Path>,
) -> Result<()> {
    let script = match strokes {
        Some(path) => load_script(path)?,
        None => StrokeScript::default(),
    };

    let (image, default_output) = match file {
        Some(file) => {
            ensure_file_exists(file)?;
            let mut workspace = open_workspace(file, width)?;
            apply_page_strokes(&mut workspace, &script)?;
            let image = workspace.capture_snapshot().context("failed to capture snapshot")?;
            (image, sibling_output(file, "snapshot", "png"))
        }
        None => {
            let mut workspace = Workspace::new(default_engine(), load_preferences(width));
            let committed = script
                .whiteboard
                .iter()
                .filter(|stroke| !stroke.is_degenerate())
                .cloned()
                .collect();
            workspace.set_whiteboard_strokes(committed);
            let image = workspace.capture_snapshot().context("failed to capture snapshot")?;
            (image, PathBuf::from("whiteboard-snapshot.png"))
        }
    };

    let output = output.map(ToOwned::to_owned).unwrap_or(default_output);
    let png = encode_png(&image).context("failed to encode snapshot")?;
    write_atomically(&output, &png)?;

    println!("{}", output.display());
    Ok(())
}

fn run_prefs(update: PrefsUpdate) -> Result<()> {
    if update.width == Some(0) {
        anyhow::bail!("--width must be greater than zero");
    }
    if update.dpr.is_some_and(|dpr| dpr.is_nan() || dpr <= 0.0) {
        anyhow::bail!("--dpr must be greater than zero");
    }

    let storage = open_storage()?;
    let mut preferences = storage.load_preferences().context("failed to load preferences")?;

    if !update.is_empty() {
        update.apply(&mut preferences);
        storage.save_preferences(&preferences).context("failed to save preferences")?;
        log::info!("saved preferences to {}", storage.root().display());
    }

    println!("{}", serde_json::to_string_pretty(&preferences)?);
    Ok(())
}

fn open_storage() -> Result<Storage> {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) => Ok(Storage::with_root(PathBuf::from(dir))),
        None => Storage::from_default_project().context("failed to locate preferences directory"),
    }
}

fn open_workspace(file: &Path, width: Option<u32>) -> Result<Workspace<LopdfEngine>> {
    let bytes = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let mut workspace = Workspace::new(default_engine(), load_preferences(width));
    workspace.load_document(bytes).context("failed to open PDF")?;
    Ok(workspace)
}

fn apply_page_strokes(
    workspace: &mut Workspace<LopdfEngine>,
    script: &StrokeScript,
) -> Result<()> {
    let page_count = workspace.layout().map_or(0, |layout| layout.page_count());

    for (page, strokes) in script.to_store().pages_with_strokes() {
        if page == 0 || page > page_count {
            log::warn!("ignoring strokes for page {page}: document has {page_count} pages");
            continue;
        }
        workspace.set_page_strokes(page, strokes.to_vec())?;
    }

    Ok(())
}

fn load_script(path: &Path) -> Result<StrokeScript> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read stroke script {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("invalid stroke script {}", path.display()))
}

fn load_preferences(width: Option<u32>) -> Preferences {
    let loaded = open_storage().and_then(|storage| Ok(storage.load_preferences()?));

    let mut preferences = match loaded {
        Ok(preferences) => preferences,
        Err(err) => {
            log::warn!("using default preferences: {err:#}");
            Preferences::default()
        }
    };

    if let Some(width) = width {
        preferences.page_render_width = width;
    }
    preferences
}

/// Writes to a temporary file next to `path` and renames it into place.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temporary file in {}", parent.display()))?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(())
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn sibling_output(file: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("document");

    file.with_file_name(format!("{stem}-{suffix}.{extension}"))
}
