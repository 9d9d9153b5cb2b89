//! Prism: live shader webcam with detection-reactive uniforms.

use anyhow::{Context, Result};
use clap::Parser;
use prism::capture::{AsyncCapture, CaptureBackend, FrameSource, NokhwaCapture, StillImageSource};
use prism::config::Config;
use prism::detect::{DetectionLoop, DetectionSnapshot, LoopEvent, OnnxDetector, Pending, Reply};
use prism::error::{GenerateError, ShaderError};
use prism::frame::VideoFrame;
use prism::generate::{GenerationRequest, HttpShaderGenerator, ShaderGenerator};
use prism::output::{HeadlessRenderer, ImageFileOutput, OutputBackend, WindowRenderer};
use prism::shader::{AdapterKind, ProgramManager, ShaderSource, SwapReport};
use prism::status::{report, StatusKind, StatusSink, TracingSink};
use prism::watch::FileWatcher;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowAttributes, WindowId};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Live shader webcam with detection-reactive uniforms.
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(about = "Draw webcam video through hot-swappable shaders that react to detected objects")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Camera device index
    #[arg(short, long)]
    input: Option<u32>,

    /// Use a still image instead of the camera
    #[arg(long)]
    image: Option<PathBuf>,

    /// Fragment shader (GLSL or WGSL), reloaded on save
    #[arg(short, long)]
    shader: Option<PathBuf>,

    /// Instruction for the shader generator (sent with G)
    #[arg(short, long)]
    prompt: Option<String>,

    /// File holding the instruction; saving it sends a request
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// How detections are written into the shader uniforms
    #[arg(long, value_enum)]
    adapter: Option<AdapterKind>,

    /// Start with detection off (toggle with D)
    #[arg(long)]
    no_detect: bool,

    /// ONNX detection model
    #[arg(long)]
    model: Option<PathBuf>,

    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Render offscreen without a window
    #[arg(long)]
    headless: bool,

    /// Stop after this many frames in headless mode (0 runs until Ctrl-C)
    #[arg(long, default_value = "0")]
    frames: u64,

    /// Image written in headless mode
    #[arg(short, long, default_value = "prism.png")]
    output: PathBuf,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(input) = args.input {
        config.capture.device_index = input;
    }
    if let Some(width) = args.width {
        config.capture.width = width;
    }
    if let Some(height) = args.height {
        config.capture.height = height;
    }
    if let Some(fps) = args.fps {
        config.capture.fps = fps;
    }
    if args.image.is_some() {
        config.image = args.image.clone();
    }
    if args.shader.is_some() {
        config.shader.path = args.shader.clone();
    }
    if args.prompt_file.is_some() {
        config.shader.prompt_file = args.prompt_file.clone();
    }
    if let Some(adapter) = args.adapter {
        config.shader.adapter = adapter;
    }
    if let Some(model) = &args.model {
        config.detection.model_path = model.clone();
    }
    if args.no_detect {
        config.detection.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

/// Everything except the GPU: frames, detection, shader sources and generation.
struct Controller {
    frames: Box<dyn FrameSource>,
    detection: DetectionLoop,
    generator: Box<dyn ShaderGenerator>,
    generations: Vec<Pending<Result<String, GenerateError>>>,
    shader_path: Option<PathBuf>,
    shader_watcher: Option<FileWatcher>,
    prompt_watcher: Option<FileWatcher>,
    prompt: Option<String>,
    status: Option<Box<dyn StatusSink>>,
    last_stats: Instant,
}

impl Controller {
    fn new(config: &Config, prompt: Option<String>) -> Result<Self> {
        let frames: Box<dyn FrameSource> = match &config.image {
            Some(image) => Box::new(StillImageSource::open(image)?),
            None => {
                info!("Opening camera device {}...", config.capture.device_index);
                Box::new(AsyncCapture::new(config.capture.clone())?)
            }
        };

        OnnxDetector::init_runtime();
        let detector = OnnxDetector::new(config.detection.detector_config()?);
        let mut detection = DetectionLoop::new(Box::new(detector), config.detection.loop_config())?;
        if config.detection.enabled {
            detection.enable();
        }

        let shader_watcher = config.shader.path.as_ref().and_then(FileWatcher::new);
        let prompt_watcher = config.shader.prompt_file.as_ref().and_then(FileWatcher::new);
        let prompt = prompt.or_else(|| {
            prompt_watcher
                .as_ref()
                .and_then(|w| w.contents())
                .map(|text| text.trim().to_string())
        });

        Ok(Self {
            frames,
            detection,
            generator: Box::new(HttpShaderGenerator::new(config.generator.clone())),
            generations: Vec::new(),
            shader_path: config.shader.path.clone(),
            shader_watcher,
            prompt_watcher,
            prompt,
            status: Some(Box::new(TracingSink)),
            last_stats: Instant::now(),
        })
    }

    fn report(&self, kind: StatusKind, message: &str) {
        report(self.status.as_deref(), kind, message);
    }

    /// Current frame and detections for the next draw.
    fn render_inputs(&mut self) -> (Option<&VideoFrame>, Arc<DetectionSnapshot>) {
        let snapshot = self.detection.snapshot();
        (self.frames.current_frame(), snapshot)
    }

    /// Advance detection, watchers and pending generations. Never blocks.
    fn tick(&mut self, now: Instant, programs: &mut ProgramManager) {
        for event in self.detection.poll(now, self.frames.as_mut()) {
            if let LoopEvent::BackendFailed(e) = event {
                self.report(StatusKind::Error, &format!("Detection unavailable: {}", e));
            }
        }
        if self.detection.is_enabled() && now.saturating_duration_since(self.last_stats) >= STATS_INTERVAL {
            let stats = self.detection.stats();
            if let Some(avg) = stats.avg_ms() {
                self.report(
                    StatusKind::Info,
                    &format!(
                        "Detection: {:.1} ms avg, {} cycles, {} failed, {} skipped, {} objects",
                        avg,
                        stats.cycles(),
                        stats.failures(),
                        stats.skipped(),
                        self.detection.snapshot().count()
                    ),
                );
            }
            self.last_stats = now;
        }

        let edited = self
            .shader_watcher
            .as_mut()
            .and_then(|w| w.check_for_changes().map(|text| ShaderSource::from_path(w.path(), text)));
        if let Some(source) = edited {
            self.apply_shader(programs, source, "Shader file");
        }

        if let Some(text) = self.prompt_watcher.as_mut().and_then(|w| w.check_for_changes()) {
            self.prompt = Some(text.trim().to_string());
            self.request_generation(programs);
        }

        let mut finished = Vec::new();
        self.generations.retain_mut(|reply| match reply.try_take() {
            Reply::Waiting => true,
            Reply::Ready(result) => {
                finished.push(result);
                false
            }
            Reply::Abandoned => {
                finished.push(Err(GenerateError::Abandoned));
                false
            }
        });
        for result in finished {
            match result {
                Ok(text) => self.apply_shader(programs, ShaderSource::detect(text), "Generated shader"),
                Err(e) => self.report(StatusKind::Error, &format!("Shader generation failed: {}", e)),
            }
        }
    }

    fn apply_shader(&self, programs: &mut ProgramManager, source: ShaderSource, origin: &str) {
        self.report_swap(programs.replace_fragment_stage(source), origin);
    }

    fn report_swap(&self, result: Result<SwapReport, ShaderError>, origin: &str) {
        match result {
            Ok(swap) => self.report(
                StatusKind::Success,
                &format!(
                    "{} installed (compile {:.1} ms, link {:.1} ms)",
                    origin,
                    swap.compile_time.as_secs_f64() * 1000.0,
                    swap.link_time.as_secs_f64() * 1000.0
                ),
            ),
            Err(e) => self.report(
                StatusKind::Error,
                &format!("{} rejected, keeping the current shader: {}", origin, e),
            ),
        }
    }

    fn reload_shader_file(&self, programs: &mut ProgramManager) {
        let Some(path) = &self.shader_path else {
            self.report(StatusKind::Info, "No shader file to reload");
            return;
        };
        match fs::read_to_string(path) {
            Ok(text) => self.apply_shader(programs, ShaderSource::from_path(path, text), "Shader file"),
            Err(e) => self.report(StatusKind::Error, &format!("Failed to read {:?}: {}", path, e)),
        }
    }

    fn request_generation(&mut self, programs: &ProgramManager) {
        let Some(instruction) = self.prompt.clone().filter(|p| !p.is_empty()) else {
            self.report(StatusKind::Info, "No prompt set (use --prompt or --prompt-file)");
            return;
        };
        let current_shader = match programs.current_source() {
            ShaderSource::Glsl(text) => Some(text.clone()),
            ShaderSource::Wgsl(_) => None,
        };
        self.report(StatusKind::Info, &format!("Generating shader: {}", instruction));
        let reply = self.generator.generate(GenerationRequest {
            instruction,
            current_shader,
        });
        self.generations.push(reply);
    }

    fn reset_shader(&self, programs: &mut ProgramManager) {
        self.report_swap(programs.reset_to_default(), "Default shader");
    }

    /// Install the configured shader file, if any, over the default program.
    fn reload_initial(&self, programs: &mut ProgramManager) {
        if self.shader_path.is_some() {
            self.reload_shader_file(programs);
        } else {
            info!("Using passthrough shader");
        }
    }

    fn toggle_detection(&mut self) {
        self.detection.toggle();
        let state = if self.detection.is_enabled() { "on" } else { "off" };
        self.report(StatusKind::Info, &format!("Detection {}", state));
    }
}

/// Application state for the event loop.
struct PrismApp {
    config: Config,
    controller: Controller,
    window: Option<Arc<Window>>,
    renderer: Option<WindowRenderer>,
}

impl PrismApp {
    fn new(config: Config, controller: Controller) -> Self {
        Self {
            config,
            controller,
            window: None,
            renderer: None,
        }
    }

    fn draw(&mut self) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let (frame, snapshot) = self.controller.render_inputs();
        match renderer.render(frame, &snapshot) {
            Ok(Some(fps)) => self
                .controller
                .report(StatusKind::Info, &format!("Rendering at {:.1} FPS", fps)),
            Ok(None) => {}
            Err(e) => error!("Render error: {}", e),
        }
    }

    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: &Key) {
        let Some(renderer) = &mut self.renderer else {
            return;
        };
        let programs = renderer.renderer_mut().programs_mut();
        match key {
            Key::Named(NamedKey::Escape) => event_loop.exit(),
            Key::Named(NamedKey::Backspace) => self.controller.reset_shader(programs),
            Key::Character(c) => match c.to_lowercase().as_str() {
                "d" => self.controller.toggle_detection(),
                "r" => self.controller.reload_shader_file(programs),
                "g" => self.controller.request_generation(programs),
                _ => {}
            },
            _ => {}
        }
    }
}

impl ApplicationHandler for PrismApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title(self.config.window.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.window.width, self.config.window.height));

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        self.window = Some(window.clone());

        match WindowRenderer::new(window, self.config.shader.adapter.build()) {
            Ok(mut renderer) => {
                info!("Window created, uniform adapter '{}'", renderer.renderer().adapter_name());
                self.controller.reload_initial(renderer.renderer_mut().programs_mut());
                self.renderer = Some(renderer);
            }
            Err(e) => {
                error!("Failed to create renderer: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size);
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state == ElementState::Pressed && !event.repeat {
                    self.handle_key(event_loop, &event.logical_key);
                }
            }
            WindowEvent::RedrawRequested => {
                self.draw();
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &mut self.renderer {
            self.controller
                .tick(Instant::now(), renderer.renderer_mut().programs_mut());
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    if args.list_devices {
        println!("Available cameras:");
        match NokhwaCapture::list_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => {
                eprintln!("Failed to list devices: {}", e);
            }
        }
        return Ok(());
    }

    let config = load_config(&args).context("invalid configuration")?;
    info!("Starting Prism...");
    let controller = Controller::new(&config, args.prompt.clone())?;

    if args.headless {
        run_headless_mode(&args, &config, controller)
    } else {
        run_window_mode(config, controller)
    }
}

/// Run in window output mode (default).
fn run_window_mode(config: Config, controller: Controller) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = PrismApp::new(config, controller);
    event_loop.run_app(&mut app)?;

    Ok(())
}

/// Render offscreen, periodically writing the latest frame to an image file.
fn run_headless_mode(args: &Args, config: &Config, mut controller: Controller) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let fps = config.capture.fps.max(1);
    let (width, height) = match controller.frames.frame_size() {
        (0, _) | (_, 0) => (config.window.width, config.window.height),
        size => size,
    };
    let mut headless = HeadlessRenderer::new(width, height, config.shader.adapter.build())?;
    controller.reload_initial(headless.renderer_mut().programs_mut());
    let mut output = ImageFileOutput::new(&args.output);

    let frame_duration = Duration::from_secs_f64(1.0 / fps as f64);
    let mut rendered = 0u64;
    info!("Rendering headless at {}x{}, {} fps", width, height, fps);

    while running.load(Ordering::SeqCst) && (args.frames == 0 || rendered < args.frames) {
        let frame_start = Instant::now();
        controller.tick(frame_start, headless.renderer_mut().programs_mut());

        let (frame, snapshot) = controller.render_inputs();
        let image = headless.render(frame, &snapshot)?;
        rendered += 1;

        if rendered % fps as u64 == 0 || rendered == args.frames {
            output.write_frame(&image)?;
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    info!("Rendered {} frames, wrote {} images to {:?}", rendered, output.written(), args.output);
    Ok(())
}
