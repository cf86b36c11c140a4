use anyhow::{Context, Result};
use clap::Parser;
use eframe::egui;
use glam::Vec2;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use spacemap::crawler::ProgressReporter;
use spacemap::geometry::Polygon;
use spacemap::inventory::leaf_name;
use spacemap::util::format_size;
use spacemap::{
    BackgroundLoader, Explorer, FetchError, FileCrawler, InventorySource, LocalInventory,
    MemoryInventory, NavOutcome, NavPhase, RenderFrame, Rgba, ScanProgress, SnapshotWatcher,
    Viewport, VizConfig,
};

/// Drill-down spatial map of disk usage.
#[derive(Parser, Debug)]
#[command(name = "spacemap", version, about)]
struct Cli {
    /// Directory to scan on startup.
    path: Option<PathBuf>,

    /// TOML file with tuning overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hierarchy levels partitioned below the current view.
    #[arg(long)]
    preview_depth: Option<u8>,

    /// Open a precomputed hierarchy artifact (JSON) instead of scanning.
    #[arg(long, conflicts_with = "path")]
    artifact: Option<PathBuf>,
}

enum Startup {
    Idle,
    Scan(PathBuf),
    Loaded {
        source: Arc<dyn InventorySource>,
        root: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spacemap=info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => VizConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => VizConfig::default(),
    };
    if let Some(depth) = cli.preview_depth {
        config.partition.preview_depth = depth.max(1);
    }

    let startup = match (&cli.artifact, &cli.path) {
        (Some(artifact), _) => {
            let json = std::fs::read_to_string(artifact)
                .with_context(|| format!("reading artifact {}", artifact.display()))?;
            let (inventory, root) = MemoryInventory::from_artifact_json(&json)
                .with_context(|| format!("parsing artifact {}", artifact.display()))?;
            Startup::Loaded {
                source: Arc::new(inventory),
                root,
            }
        }
        (None, Some(path)) => Startup::Scan(path.clone()),
        (None, None) => Startup::Idle,
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_title("spacemap"),
        ..Default::default()
    };

    eframe::run_native(
        "spacemap",
        options,
        Box::new(move |cc| {
            configure_custom_style(&cc.egui_ctx);
            Box::new(SpaceMapApp::new(config, startup))
        }),
    )
    .map_err(|err| anyhow::anyhow!("window failed: {err}"))
}

fn configure_custom_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();
    let mut visuals = egui::Visuals::dark();

    visuals.panel_fill = egui::Color32::from_rgba_unmultiplied(30, 41, 59, 240);
    visuals.window_fill = egui::Color32::from_rgba_unmultiplied(30, 41, 59, 230);
    visuals.window_stroke = egui::Stroke::new(1.0, egui::Color32::from_rgba_unmultiplied(255, 255, 255, 26));
    visuals.widgets.noninteractive.bg_stroke =
        egui::Stroke::new(1.0, egui::Color32::from_rgba_unmultiplied(255, 255, 255, 13));
    visuals.window_rounding = egui::Rounding::same(12.0);
    visuals.widgets.inactive.rounding = egui::Rounding::same(8.0);
    visuals.widgets.hovered.rounding = egui::Rounding::same(8.0);
    visuals.widgets.active.rounding = egui::Rounding::same(8.0);
    visuals.window_shadow = egui::epaint::Shadow::NONE;

    style.visuals = visuals;
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);
    style.spacing.button_padding = egui::vec2(16.0, 8.0);
    ctx.set_style(style);
}

type ScanSlot = Arc<Mutex<Option<Result<LocalInventory, FetchError>>>>;

struct ScanJob {
    path: PathBuf,
    result: ScanSlot,
    progress: Arc<Mutex<Option<ScanProgress>>>,
}

struct SpaceMapApp {
    config: VizConfig,
    scan_path: String,
    scan: Option<ScanJob>,
    explorer: Option<Explorer>,
    loader: Option<BackgroundLoader>,
    watcher: Option<SnapshotWatcher>,
    stale: bool,
    status: Option<String>,
}

impl SpaceMapApp {
    fn new(config: VizConfig, startup: Startup) -> Self {
        let mut app = Self {
            config,
            scan_path: String::new(),
            scan: None,
            explorer: None,
            loader: None,
            watcher: None,
            stale: false,
            status: None,
        };
        match startup {
            Startup::Idle => {}
            Startup::Scan(path) => {
                app.scan_path = path.display().to_string();
                app.start_scan();
            }
            Startup::Loaded { source, root } => {
                app.scan_path = root.clone();
                app.attach(source, root, None);
            }
        }
        app
    }

    fn start_scan(&mut self) {
        if self.scan.is_some() {
            return;
        }
        let path = if self.scan_path.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.scan_path)
        };
        let path = path.canonicalize().unwrap_or(path);

        let result: ScanSlot = Arc::new(Mutex::new(None));
        let progress = Arc::new(Mutex::new(None));
        let reporter: ProgressReporter = {
            let progress = Arc::clone(&progress);
            Arc::new(move |update: ScanProgress| {
                if let Ok(mut slot) = progress.lock() {
                    *slot = Some(update);
                }
            })
        };

        let worker_result = Arc::clone(&result);
        let worker_path = path.clone();
        thread::spawn(move || {
            let scanned = FileCrawler::new().scan(&worker_path, Some(reporter));
            if let Ok(mut slot) = worker_result.lock() {
                *slot = Some(scanned);
            }
        });

        tracing::info!(path = %path.display(), "scan started");
        self.stale = false;
        self.status = None;
        self.scan = Some(ScanJob {
            path,
            result,
            progress,
        });
    }

    fn poll_scan(&mut self) {
        let finished = self
            .scan
            .as_ref()
            .and_then(|job| job.result.try_lock().ok().and_then(|mut slot| slot.take()));
        let Some(finished) = finished else {
            return;
        };
        let Some(job) = self.scan.take() else {
            return;
        };

        match finished {
            Ok(inventory) => {
                let stats = inventory.stats();
                tracing::info!(
                    files = stats.total_files,
                    dirs = stats.total_dirs,
                    size = %format_size(stats.total_size),
                    ms = stats.duration_ms as u64,
                    "scan finished"
                );
                let root = inventory.root().to_string();
                self.attach(Arc::new(inventory), root, Some(job.path));
            }
            Err(err) => {
                tracing::warn!(%err, "scan failed");
                self.status = Some(format!("Scan failed: {err}"));
            }
        }
    }

    /// Point the engine at a new inventory.
    fn attach(&mut self, source: Arc<dyn InventorySource>, root: String, watch_root: Option<PathBuf>) {
        self.loader = Some(BackgroundLoader::spawn(source));
        let outcome = match self.explorer.as_mut() {
            Some(explorer) => explorer.set_snapshot(root),
            None => {
                let mut explorer = Explorer::new(root, self.config.clone());
                let outcome = explorer.start();
                self.explorer = Some(explorer);
                outcome
            }
        };
        self.watcher = watch_root.and_then(|path| match SnapshotWatcher::new(&path) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!(%err, "change watching disabled");
                None
            }
        });
        self.dispatch(outcome);
    }

    fn dispatch(&mut self, outcome: NavOutcome) {
        match outcome {
            NavOutcome::Fetch(request) => {
                let submitted = match &self.loader {
                    Some(loader) => loader.submit(request),
                    None => Err(FetchError::Backend("no inventory loaded".to_string())),
                };
                if let Err(err) = submitted {
                    self.status = Some(err.to_string());
                }
            }
            NavOutcome::Ready => self.status = None,
            NavOutcome::Failed(err) => self.status = Some(err.to_string()),
            NavOutcome::Ignored => {}
        }
    }

    fn poll_loader(&mut self) {
        let mut outcomes = Vec::new();
        if let (Some(loader), Some(explorer)) = (&self.loader, self.explorer.as_mut()) {
            while let Some(response) = loader.try_recv() {
                outcomes.push(explorer.complete_fetch(response.ticket, response.result));
            }
            outcomes.push(explorer.check_timeout());
        }
        for outcome in outcomes {
            self.dispatch(outcome);
        }
    }

    fn poll_watcher(&mut self) {
        if let Some(watcher) = &self.watcher {
            if watcher.take_stale() {
                self.stale = true;
            }
        }
    }

    fn navigation_bar(&mut self, ui: &mut egui::Ui) {
        let Some(explorer) = self.explorer.as_mut() else {
            return;
        };
        let mut outcome = None;
        ui.horizontal(|ui| {
            let crumbs = explorer.breadcrumbs();
            if ui
                .add_enabled(crumbs.len() > 1 && !explorer.is_locked(), egui::Button::new("⬅ Back"))
                .clicked()
            {
                outcome = Some(explorer.go_back());
            }
            ui.separator();

            let last = crumbs.len().saturating_sub(1);
            for (index, crumb) in crumbs.iter().enumerate() {
                let name = if index == 0 { crumb.clone() } else { leaf_name(crumb) };
                if index == last {
                    ui.strong(name);
                } else if ui.link(name).clicked() {
                    outcome = Some(explorer.go_to_breadcrumb(crumb));
                }
                if index != last {
                    ui.label("›");
                }
            }

            match explorer.phase() {
                NavPhase::Loading { .. } => {
                    ui.spinner();
                }
                NavPhase::Error { target, .. } => {
                    ui.colored_label(egui::Color32::from_rgb(248, 113, 113), format!("Failed to open {target}"));
                    if ui.button("Retry").clicked() {
                        outcome = Some(explorer.retry());
                    }
                }
                NavPhase::Idle => {}
            }
        });
        if let Some(outcome) = outcome {
            self.dispatch(outcome);
        }
    }

    fn map_panel(&mut self, ui: &mut egui::Ui) {
        let rect = ui.available_rect_before_wrap();
        let response = ui.allocate_rect(rect, egui::Sense::click_and_drag());
        let painter = ui.painter_at(rect);
        let origin = rect.min.to_vec2();
        let to_local = |pos: egui::Pos2| Vec2::new(pos.x - origin.x, pos.y - origin.y);

        let depth = self
            .explorer
            .as_ref()
            .map(|explorer| explorer.breadcrumbs().len().saturating_sub(1))
            .unwrap_or(0);
        draw_aurora_background(&painter, rect, depth);

        let Some(explorer) = self.explorer.as_mut() else {
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "Choose a folder and press Scan",
                egui::FontId::proportional(16.0),
                egui::Color32::from_rgba_unmultiplied(255, 255, 255, 153),
            );
            return;
        };

        let mut outcome = None;
        if let Some(pos) = response.interact_pointer_pos().filter(|_| response.drag_started()) {
            explorer.begin_drag(to_local(pos));
        }
        if response.dragged() && explorer.is_dragging() {
            if let Some(pos) = response.interact_pointer_pos() {
                explorer.drag_to(to_local(pos));
            }
        }
        if response.drag_released() {
            explorer.end_drag();
        }
        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                outcome = Some(explorer.click(to_local(pos)));
            }
        }
        if response.secondary_clicked() || ui.input(|i| i.key_pressed(egui::Key::Backspace)) {
            outcome = Some(explorer.go_back());
        }

        explorer.tick();
        let viewport = Viewport::new(rect.width(), rect.height());
        if let Some(frame) = explorer.frame(viewport) {
            paint_frame(&painter, origin, &frame);
        }

        let hovered = explorer
            .set_hover(response.hover_pos().map(to_local))
            .map(|cell| (cell.polygon.clone(), cell.name.clone(), cell.size));
        if let Some((polygon, name, size)) = hovered {
            painter.add(egui::Shape::closed_line(
                screen_points(&polygon, origin),
                egui::Stroke::new(2.0, egui::Color32::WHITE),
            ));
            painter.text(
                rect.left_bottom() + egui::vec2(12.0, -12.0),
                egui::Align2::LEFT_BOTTOM,
                format!("{name}  {}", format_size(size)),
                egui::FontId::proportional(13.0),
                egui::Color32::WHITE,
            );
        }

        if explorer.is_locked() || explorer.is_animating() || explorer.is_dragging() {
            ui.ctx().request_repaint();
        }
        if let Some(outcome) = outcome {
            self.dispatch(outcome);
        }
    }
}

fn color(rgba: Rgba) -> egui::Color32 {
    egui::Color32::from_rgba_unmultiplied(rgba.r, rgba.g, rgba.b, rgba.a)
}

fn screen_points(polygon: &Polygon, origin: egui::Vec2) -> Vec<egui::Pos2> {
    polygon
        .points()
        .iter()
        .map(|p| egui::pos2(p.x + origin.x, p.y + origin.y))
        .collect()
}

fn paint_frame(painter: &egui::Painter, origin: egui::Vec2, frame: &RenderFrame) {
    let edge = egui::Stroke::new(1.0, egui::Color32::from_rgba_unmultiplied(255, 255, 255, 30));

    for fill in &frame.background {
        painter.add(egui::Shape::convex_polygon(
            screen_points(&fill.polygon, origin),
            color(fill.color),
            edge,
        ));
    }
    for fill in &frame.preview {
        painter.add(egui::Shape::convex_polygon(
            screen_points(&fill.polygon, origin),
            color(fill.color),
            egui::Stroke::new(0.5, egui::Color32::from_rgba_unmultiplied(255, 255, 255, 20)),
        ));
    }
    for bubble in &frame.bubbles {
        let center = egui::pos2(bubble.center.x + origin.x, bubble.center.y + origin.y);
        painter.circle(center, bubble.radius, color(bubble.color), edge);
    }
    for label in &frame.labels {
        let at = egui::pos2(label.position.x + origin.x, label.position.y + origin.y);
        painter.text(
            at - egui::vec2(0.0, label.font_size * 0.6),
            egui::Align2::CENTER_CENTER,
            &label.text,
            egui::FontId::proportional(label.font_size),
            egui::Color32::WHITE,
        );
        painter.text(
            at + egui::vec2(0.0, label.font_size * 0.6),
            egui::Align2::CENTER_CENTER,
            &label.detail,
            egui::FontId::proportional((label.font_size * 0.8).max(8.0)),
            egui::Color32::from_rgba_unmultiplied(255, 255, 255, 153),
        );
    }
}

/// Gradient backdrop that darkens as the view goes deeper.
fn draw_aurora_background(painter: &egui::Painter, rect: egui::Rect, depth: usize) {
    let depth_factor = (depth as f32 * 0.1).min(0.3);
    let top = egui::Color32::from_rgb(
        (30.0 - depth_factor * 10.0) as u8,
        (41.0 + depth_factor * 35.0) as u8,
        (59.0 + depth_factor * 59.0) as u8,
    );
    let bottom = egui::Color32::from_rgb(
        (15.0 - depth_factor * 5.0) as u8,
        (118.0 - depth_factor * 20.0) as u8,
        (110.0 + depth_factor * 8.0) as u8,
    );

    let mut mesh = egui::Mesh::default();
    for (pos, color) in [
        (rect.left_top(), top),
        (rect.right_top(), top),
        (rect.right_bottom(), bottom),
        (rect.left_bottom(), bottom),
    ] {
        mesh.colored_vertex(pos, color);
    }
    mesh.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
    painter.add(egui::Shape::mesh(mesh));
}

impl eframe::App for SpaceMapApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_scan();
        self.poll_loader();
        self.poll_watcher();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("spacemap");
                ui.separator();
                ui.label("Path:");
                ui.text_edit_singleline(&mut self.scan_path);
                if ui
                    .add_enabled(self.scan.is_none(), egui::Button::new("Scan"))
                    .clicked()
                {
                    self.start_scan();
                }

                if let Some(job) = &self.scan {
                    ui.spinner();
                    let fraction = job
                        .progress
                        .lock()
                        .ok()
                        .and_then(|progress| progress.as_ref().and_then(ScanProgress::fraction));
                    match fraction {
                        Some(fraction) => ui.label(format!("Scanning… {:.0}%", fraction * 100.0)),
                        None => ui.label("Scanning…"),
                    };
                }
                if self.stale && self.scan.is_none() {
                    ui.colored_label(egui::Color32::from_rgb(245, 158, 11), "Changed on disk");
                    if ui.button("Rescan").clicked() {
                        self.start_scan();
                    }
                }
                if let Some(status) = &self.status {
                    ui.label(status);
                }
            });
            self.navigation_bar(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.map_panel(ui);
        });

        if self.scan.is_some() {
            ctx.request_repaint();
        } else if self.loader.is_some() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }
    }
}
