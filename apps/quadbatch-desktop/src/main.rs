use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use glam::{Vec2, Vec3};
use quadbatch_assets::ImageData;
use quadbatch_common::{Color, TextureId, Transform, UvRect};
use quadbatch_render::{BatchRenderer, RendererConfig};
use quadbatch_render_wgpu::{
    GpuContext, Material, MeshHandle, MeshRenderer, OrbitCamera, WgpuBackend,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Animated quads through the batch renderer
    Sprites,
    /// Lit cubes under an orbit camera
    Mesh,
}

#[derive(Parser)]
#[command(name = "quadbatch-desktop", about = "Quad batcher desktop demos")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[arg(long, value_enum, default_value = "sprites")]
    mode: Mode,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    /// Number of animated quads per frame (sprites mode)
    #[arg(long, default_value = "2000")]
    quads: usize,

    /// Image drawn as a textured quad / cube face
    #[arg(long)]
    texture: Option<PathBuf>,

    /// Renderer configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Position and tint of animated quad `i` of `n` at time `t`.
fn sprite_at(i: usize, n: usize, t: f32, width: f32, height: f32) -> (Vec2, Color) {
    let cols = (n as f32).sqrt().ceil().max(1.0);
    let col = i as f32 % cols;
    let row = (i as f32 / cols).floor();
    let cell = Vec2::new(width / cols, height / cols);
    let phase = i as f32 * 0.37;
    let wobble = Vec2::new((t * 1.3 + phase).sin(), (t * 0.9 + phase).cos()) * cell * 0.25;
    let pos = Vec2::new((col + 0.5) * cell.x, (row + 0.5) * cell.y) + wobble;
    let color = Color::rgb(
        0.5 + 0.5 * (t + phase).sin(),
        0.5 + 0.5 * (t + phase + 2.1).sin(),
        0.5 + 0.5 * (t + phase + 4.2).sin(),
    );
    (pos, color)
}

struct SpriteScene {
    renderer: BatchRenderer<WgpuBackend>,
    quads: usize,
    sprite_texture: TextureId,
    atlas: TextureId,
    started: Instant,
    frames: u32,
    last_title: Instant,
}

impl SpriteScene {
    fn new(window: Arc<Window>, cli: &Cli) -> Result<Self> {
        let size = window.inner_size();
        let ctx = GpuContext::new(window, size.width, size.height)?;
        let config = match &cli.config {
            Some(path) => RendererConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RendererConfig::default(),
        };
        let mut renderer = BatchRenderer::create(WgpuBackend::new(ctx), config)?;

        let atlas = renderer.create_texture(&ImageData::checkerboard(
            64,
            8,
            [255, 255, 255, 255],
            [40, 40, 60, 255],
        ))?;
        let sprite_texture = match &cli.texture {
            Some(path) => renderer.load_texture(path)?,
            None => atlas,
        };

        Ok(Self {
            renderer,
            quads: cli.quads,
            sprite_texture,
            atlas,
            started: Instant::now(),
            frames: 0,
            last_title: Instant::now(),
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.renderer.backend_mut().resize(width, height);
    }

    fn frame(&mut self, window: &Window) -> Result<()> {
        let t = self.started.elapsed().as_secs_f32();
        let size = window.inner_size();
        let (width, height) = (size.width as f32, size.height as f32);

        self.renderer.clear_default();
        self.renderer.begin()?;
        for i in 0..self.quads {
            let (pos, color) = sprite_at(i, self.quads, t, width, height);
            self.renderer.draw_quad(pos, Vec2::splat(12.0), color)?;
        }
        let center = Vec2::new(width, height) * 0.5;
        self.renderer
            .draw_texture(self.sprite_texture, center, Vec2::splat(256.0), Color::WHITE)?;
        // Top-left quarter of the atlas, in each corner.
        let quarter = UvRect::from_pixels(0.0, 0.0, 32.0, 32.0, 64, 64);
        for corner in [
            Vec2::new(80.0, 80.0),
            Vec2::new(width - 80.0, 80.0),
            Vec2::new(80.0, height - 80.0),
            Vec2::new(width - 80.0, height - 80.0),
        ] {
            self.renderer.draw_sub_texture(
                Some(self.atlas),
                corner,
                Vec2::splat(128.0),
                quarter,
                Color::rgba(1.0, 0.8, 0.4, 0.9),
            )?;
        }
        let stats = self.renderer.end()?;

        self.frames += 1;
        let elapsed = self.last_title.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frames as f32 / elapsed;
            window.set_title(&format!("quadbatch sprites | {stats} | {fps:.0} fps"));
            self.frames = 0;
            self.last_title = Instant::now();
        }
        Ok(())
    }

    fn shutdown(self) {
        drop(self.renderer.destroy());
    }
}

struct MeshScene {
    ctx: GpuContext,
    renderer: MeshRenderer,
    camera: OrbitCamera,
    cube: MeshHandle,
    objects: Vec<(Material, Transform, f32)>,
    keys_held: HashSet<KeyCode>,
    dragging: bool,
    cursor: Option<PhysicalPosition<f64>>,
    last_frame: Instant,
    started: Instant,
}

impl MeshScene {
    fn new(window: Arc<Window>, cli: &Cli) -> Result<Self> {
        let size = window.inner_size();
        let ctx = GpuContext::new(window, size.width, size.height)?;
        let mut renderer =
            MeshRenderer::new(&ctx.device, &ctx.queue, ctx.format(), size.width, size.height);
        let cube = renderer.create_cube(&ctx.device);

        let image = match &cli.texture {
            Some(path) => ImageData::from_file(path)?,
            None => ImageData::checkerboard(64, 8, [230, 230, 230, 255], [90, 90, 110, 255]),
        };
        let texture = renderer.create_texture(&ctx.device, &ctx.queue, &image);

        let textured = Material {
            tint: Color::WHITE,
            texture: Some(texture),
        };
        let objects = vec![
            (textured, Transform::default(), 0.6),
            (
                Material {
                    tint: Color::rgb(0.9, 0.25, 0.2),
                    texture: None,
                },
                Transform::new(Vec3::new(2.0, 0.0, 0.0), Vec3::splat(0.8)),
                -0.9,
            ),
            (
                Material {
                    tint: Color::rgb(0.2, 0.45, 0.95),
                    texture: None,
                },
                Transform::new(Vec3::new(-2.0, 0.0, 1.0), Vec3::splat(0.8)),
                1.2,
            ),
            (
                Material {
                    tint: Color::rgb(0.5, 0.5, 0.5),
                    texture: Some(texture),
                },
                Transform::new(Vec3::new(0.0, -0.75, 0.0), Vec3::new(10.0, 0.1, 10.0)),
                0.0,
            ),
        ];

        let mut camera = OrbitCamera::from_look_at(Vec3::new(0.0, 3.0, 7.0), Vec3::ZERO);
        camera.set_aspect(size.width, size.height);

        Ok(Self {
            ctx,
            renderer,
            camera,
            cube,
            objects,
            keys_held: HashSet::new(),
            dragging: false,
            cursor: None,
            last_frame: Instant::now(),
            started: Instant::now(),
        })
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.ctx.resize(width, height);
        self.renderer.resize(&self.ctx.device, width, height);
        self.camera.set_aspect(width, height);
    }

    fn cursor_moved(&mut self, position: PhysicalPosition<f64>) {
        if let (true, Some(last)) = (self.dragging, self.cursor) {
            self.camera
                .orbit((position.x - last.x) as f32, (position.y - last.y) as f32);
        }
        self.cursor = Some(position);
    }

    fn update(&mut self, dt: f32) {
        let step = 4.0 * dt;
        let mut pan = Vec2::ZERO;
        if self.keys_held.contains(&KeyCode::ArrowLeft) {
            pan.x -= step;
        }
        if self.keys_held.contains(&KeyCode::ArrowRight) {
            pan.x += step;
        }
        if self.keys_held.contains(&KeyCode::ArrowUp) {
            pan.y += step;
        }
        if self.keys_held.contains(&KeyCode::ArrowDown) {
            pan.y -= step;
        }
        if pan != Vec2::ZERO {
            self.camera.pan(pan.x, pan.y);
        }
    }

    fn frame(&mut self) -> Result<()> {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32().min(0.1);
        self.last_frame = now;
        self.update(dt);

        let Some(output) = self.ctx.acquire_frame() else {
            return Ok(());
        };
        let view = output.texture.create_view(&Default::default());

        let t = self.started.elapsed().as_secs_f32();
        self.renderer.begin(&self.ctx.queue, self.camera.view_projection());
        for (material, transform, spin) in &mut self.objects {
            if *spin != 0.0 {
                transform.rotate(t * *spin, Vec3::new(0.3, 1.0, 0.1));
            }
            self.renderer.submit(self.cube, material, transform);
        }
        self.renderer.end(
            &self.ctx.device,
            &self.ctx.queue,
            &view,
            Color::rgb(0.1, 0.1, 0.15),
        );
        output.present();
        Ok(())
    }
}

enum Scene {
    Sprites(SpriteScene),
    Mesh(Box<MeshScene>),
}

struct App {
    cli: Cli,
    window: Option<Arc<Window>>,
    scene: Option<Scene>,
    error: Option<anyhow::Error>,
}

impl App {
    fn new(cli: Cli) -> Self {
        Self {
            cli,
            window: None,
            scene: None,
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let title = match self.cli.mode {
            Mode::Sprites => "quadbatch sprites",
            Mode::Mesh => "quadbatch mesh viewer",
        };
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(self.cli.width, self.cli.height));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let scene = match self.cli.mode {
            Mode::Sprites => Scene::Sprites(SpriteScene::new(window.clone(), &self.cli)?),
            Mode::Mesh => Scene::Mesh(Box::new(MeshScene::new(window.clone(), &self.cli)?)),
        };
        self.window = Some(window);
        self.scene = Some(scene);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        tracing::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }

    fn shutdown(&mut self) {
        if let Some(Scene::Sprites(scene)) = self.scene.take() {
            scene.shutdown();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let (Some(window), Some(scene)) = (self.window.clone(), self.scene.as_mut()) else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                self.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => match scene {
                Scene::Sprites(s) => s.resize(size.width, size.height),
                Scene::Mesh(s) => s.resize(size.width, size.height),
            },
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: key_state,
                        ..
                    },
                ..
            } => {
                if key == KeyCode::Escape {
                    self.shutdown();
                    event_loop.exit();
                    return;
                }
                if let Scene::Mesh(s) = scene {
                    if key_state == ElementState::Pressed {
                        s.keys_held.insert(key);
                    } else {
                        s.keys_held.remove(&key);
                    }
                }
            }
            WindowEvent::MouseInput {
                button: MouseButton::Left,
                state: btn_state,
                ..
            } => {
                if let Scene::Mesh(s) = scene {
                    s.dragging = btn_state == ElementState::Pressed;
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                if let Scene::Mesh(s) = scene {
                    s.cursor_moved(position);
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                if let Scene::Mesh(s) = scene {
                    let amount = match delta {
                        MouseScrollDelta::LineDelta(_, y) => y * 0.5,
                        MouseScrollDelta::PixelDelta(p) => p.y as f32 / 100.0,
                    };
                    s.camera.zoom(amount);
                }
            }
            WindowEvent::RedrawRequested => {
                let result = match scene {
                    Scene::Sprites(s) => s.frame(&window),
                    Scene::Mesh(s) => s.frame(),
                };
                if let Err(e) = result {
                    self.fail(event_loop, e);
                    return;
                }
                window.request_redraw();
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("quadbatch-desktop starting in {:?} mode", cli.mode);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(cli);
    event_loop.run_app(&mut app)?;
    app.shutdown();

    match app.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprites_stay_near_their_cells() {
        let (w, h) = (800.0, 600.0);
        for i in 0..100 {
            let (pos, color) = sprite_at(i, 100, 3.7, w, h);
            assert!(pos.x > -w * 0.05 && pos.x < w * 1.05);
            assert!(pos.y > -h * 0.05 && pos.y < h * 1.05);
            for c in color.to_array() {
                assert!((0.0..=1.0).contains(&c));
            }
        }
    }

    #[test]
    fn single_sprite_is_centered_at_rest() {
        let (pos, _) = sprite_at(0, 1, 0.0, 100.0, 100.0);
        // Wobble at t = 0 is (0, cell/4).
        assert!((pos - Vec2::new(50.0, 75.0)).length() < 1e-4);
    }
}
