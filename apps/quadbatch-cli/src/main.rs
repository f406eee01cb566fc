use anyhow::Context as _;
use clap::{Parser, Subcommand};
use glam::Vec2;
use quadbatch_assets::ImageData;
use quadbatch_common::Color;
use quadbatch_render::{BatchRenderer, FrameStats, QuadAnchor, RecordingBackend, RendererConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quadbatch-cli", about = "Headless tool for the quad batcher")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Run frames against the recording backend and print their stats
    Simulate {
        /// Quads submitted per frame
        #[arg(short, long, default_value = "1000")]
        quads: usize,
        /// Distinct textures the quads cycle through (0 = untextured)
        #[arg(short, long, default_value = "4")]
        textures: usize,
        /// Number of frames
        #[arg(short, long, default_value = "3")]
        frames: usize,
        /// Per-batch capacity, overriding the config file
        #[arg(long)]
        max_quads: Option<usize>,
        /// Renderer configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the device-space vertices of a single quad
    Inspect {
        #[arg(long, default_value = "0")]
        x: f32,
        #[arg(long, default_value = "0")]
        y: f32,
        #[arg(long, default_value = "1")]
        w: f32,
        #[arg(long, default_value = "1")]
        h: f32,
        /// Viewport width in pixels
        #[arg(long, default_value = "800")]
        width: u32,
        /// Viewport height in pixels
        #[arg(long, default_value = "600")]
        height: u32,
        /// Treat the position as the quad's top-left corner
        #[arg(long)]
        top_left: bool,
    },
}

/// Solid 4x4 image whose color encodes `index`, so every simulated texture
/// has distinct content and gets its own batch.
fn texture_image(index: usize) -> ImageData {
    let [r, g, b, ..] = (index as u32).to_le_bytes();
    ImageData::solid(4, 4, [r, g, b, 255])
}

fn simulate(
    quads: usize,
    textures: usize,
    frames: usize,
    config: RendererConfig,
) -> anyhow::Result<Vec<FrameStats>> {
    let mut renderer = BatchRenderer::create(RecordingBackend::new(1280, 720), config)?;

    let mut handles = Vec::with_capacity(textures);
    for i in 0..textures {
        handles.push(renderer.create_texture(&texture_image(i))?);
    }

    let mut all = Vec::with_capacity(frames);
    for frame in 0..frames {
        renderer.clear_default();
        renderer.begin()?;
        for i in 0..quads {
            let pos = Vec2::new((i % 64) as f32 * 20.0, (i / 64 % 36) as f32 * 20.0);
            let texture = if handles.is_empty() {
                None
            } else {
                Some(handles[i % handles.len()])
            };
            renderer.submit_quad(texture, pos, Vec2::splat(16.0), Color::WHITE)?;
        }
        let stats = renderer.end()?;
        renderer.backend_mut().take_calls();
        println!("frame {frame}: {stats}");
        all.push(stats);
    }

    renderer.destroy();
    Ok(all)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("quadbatch-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", quadbatch_render::crate_info());
            let config = RendererConfig::default();
            println!(
                "defaults: max_quads={} max_vertices={} max_indices={} anchor={:?}",
                config.max_quads,
                config.max_vertices(),
                config.max_indices(),
                config.anchor
            );
        }
        Commands::Simulate {
            quads,
            textures,
            frames,
            max_quads,
            config,
        } => {
            let mut config = match config {
                Some(path) => RendererConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => RendererConfig::default(),
            };
            if let Some(max_quads) = max_quads {
                config.max_quads = max_quads;
            }
            println!(
                "Simulating {frames} frames: {quads} quads over {textures} textures, \
                 {} quads per batch",
                config.max_quads
            );
            let stats = simulate(quads, textures, frames, config)?;
            let draws: usize = stats.iter().map(|s| s.draw_calls).sum();
            println!("total draw calls: {draws}");
        }
        Commands::Inspect {
            x,
            y,
            w,
            h,
            width,
            height,
            top_left,
        } => {
            let config = RendererConfig {
                anchor: if top_left {
                    QuadAnchor::TopLeft
                } else {
                    QuadAnchor::Center
                },
                ..RendererConfig::default()
            };
            let mut renderer =
                BatchRenderer::create(RecordingBackend::new(width, height), config)?;
            renderer.begin()?;
            renderer.draw_quad(Vec2::new(x, y), Vec2::new(w, h), Color::WHITE)?;
            renderer.end()?;

            let backend = renderer.destroy();
            println!("quad at ({x}, {y}) size {w}x{h} in a {width}x{height} viewport:");
            for (_, vertices, index_count) in backend.draws() {
                for (i, v) in vertices.iter().enumerate() {
                    println!(
                        "  v{i}: pos=({:+.4}, {:+.4}, {:+.4}) uv=({:.2}, {:.2})",
                        v.position[0], v.position[1], v.position[2], v.uv[0], v.uv[1]
                    );
                }
                println!("  indices: {index_count}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulate_reports_auto_flushes() {
        let stats = simulate(25, 1, 2, RendererConfig::with_max_quads(10)).unwrap();
        assert_eq!(stats.len(), 2);
        for s in stats {
            assert_eq!(s.quads, 25);
            // Two forced flushes at 10 and 20, then the end-of-frame flush.
            assert_eq!(s.auto_flushes, 2);
            assert_eq!(s.draw_calls, 3);
        }
    }

    #[test]
    fn simulate_untextured_uses_one_batch() {
        let stats = simulate(50, 0, 1, RendererConfig::default()).unwrap();
        assert_eq!(stats[0].draw_calls, 1);
        assert_eq!(stats[0].vertices_uploaded, 200);
    }

    #[test]
    fn simulate_gives_every_texture_its_own_batch() {
        let stats = simulate(300, 300, 1, RendererConfig::default()).unwrap();
        assert_eq!(stats[0].quads, 300);
        assert_eq!(stats[0].draw_calls, 300);
        assert_eq!(stats[0].auto_flushes, 0);
    }

    #[test]
    fn simulate_rejects_zero_capacity() {
        assert!(simulate(1, 1, 1, RendererConfig::with_max_quads(0)).is_err());
    }
}
