//! Blobfield viewer.
//!
//! ```text
//! blobfield [--config engine.json] [--state blobfield_state.json]
//! blobfield --snapshot out.png [--trace | --volume] [--size 640x480] [--forks N]
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use blobfield::prelude::*;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "blobfield")]
#[command(about = "Metaball source trees with radial layout and smooth-field rendering")]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// State file to load at startup and export to with `E`
    #[arg(long)]
    state: Option<PathBuf>,

    /// Render one CPU frame to this PNG and exit
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Sphere-trace the surface instead of the flat screen pass
    #[arg(long, conflicts_with = "volume")]
    trace: bool,

    /// Volumetric Beer-Lambert pass
    #[arg(long)]
    volume: bool,

    /// Snapshot size as WxH
    #[arg(long, default_value = "640x480", value_parser = parse_size)]
    size: (u32, u32),

    /// Forks from the root when the snapshot starts from an empty tree
    #[arg(long, default_value_t = 6)]
    forks: u32,
}

impl Cli {
    fn trace_mode(&self) -> Option<TraceMode> {
        match (self.trace, self.volume) {
            (_, true) => Some(TraceMode::Volume),
            (true, false) => Some(TraceMode::Surface),
            (false, false) => None,
        }
    }
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw.split_once('x').ok_or_else(|| format!("expected WxH, got {raw:?}"))?;
    let w = w.parse().map_err(|_| format!("bad width in {raw:?}"))?;
    let h = h.parse().map_err(|_| format!("bad height in {raw:?}"))?;
    Ok((w, h))
}

/// Size `backend` and draw one frame into it.
fn draw_once(engine: &mut Engine, backend: &mut dyn RenderBackend, size: (u32, u32)) -> Result<(), ViewerError> {
    engine.resize(backend, size.0, size.1);
    let status = engine.tick(backend)?;
    if status == FrameStatus::Skipped {
        return Err(RenderError::SurfaceUnavailable(format!("{}x{} frame was not drawn", size.0, size.1)).into());
    }
    Ok(())
}

/// Render one CPU frame of `engine` and write it as PNG.
fn snapshot(engine: &mut Engine, args: &Cli, out: &Path) -> Result<(), ViewerError> {
    let render = engine.config().render.clone();
    let field = engine.config().field.clone();
    match args.trace_mode() {
        Some(mode) => {
            let mut backend = SphereTraceBackend::new(render.with_trace_mode(mode), field);
            draw_once(engine, &mut backend, args.size)?;
            backend.frame().save_png(out)?;
            engine.shutdown(&mut backend);
        }
        None => {
            let mut backend = ScreenSpaceBackend::new(render, field);
            draw_once(engine, &mut backend, args.size)?;
            backend.frame().save_png(out)?;
            engine.shutdown(&mut backend);
        }
    }
    info!(path = %out.display(), width = args.size.0, height = args.size.1, "wrote snapshot");
    Ok(())
}

fn run(args: Cli) -> Result<(), ViewerError> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let mut engine = Engine::new(config);

    if let Some(path) = &args.state {
        if path.exists() {
            engine.import_state(&std::fs::read_to_string(path)?)?;
        }
    }

    match &args.snapshot {
        Some(out) => {
            let mut engine = engine.with_clock(FrameClock::fixed(1.0 / 60.0));
            if engine.tree().len() == 1 {
                let root = engine.tree().root();
                for _ in 0..args.forks {
                    if let Err(err) = engine.fork(root) {
                        error!(%err, "fork failed");
                        break;
                    }
                }
            }
            snapshot(&mut engine, &args, out)
        }
        None => {
            let mut viewer = Viewer::new(engine);
            if let Some(path) = args.state {
                viewer = viewer.with_state_path(path);
            }
            viewer.run()
        }
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "blobfield failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["blobfield"]).unwrap();
        assert_eq!(cli.size, (640, 480));
        assert_eq!(cli.forks, 6);
        assert!(cli.snapshot.is_none());
        assert_eq!(cli.trace_mode(), None);
    }

    #[test]
    fn test_snapshot_flags() {
        let cli = Cli::try_parse_from([
            "blobfield", "--snapshot", "out.png", "--volume", "--size", "320x200", "--forks", "3",
        ])
        .unwrap();
        assert_eq!(cli.snapshot, Some(PathBuf::from("out.png")));
        assert_eq!(cli.trace_mode(), Some(TraceMode::Volume));
        assert_eq!(cli.size, (320, 200));
        assert_eq!(cli.forks, 3);

        let cli = Cli::try_parse_from(["blobfield", "--trace"]).unwrap();
        assert_eq!(cli.trace_mode(), Some(TraceMode::Surface));
    }

    #[test]
    fn test_bad_size_rejected() {
        assert!(parse_size("640").is_err());
        assert!(parse_size("640xabc").is_err());
        assert!(Cli::try_parse_from(["blobfield", "--size", "wide"]).is_err());
    }

    #[test]
    fn test_trace_conflicts_with_volume() {
        assert!(Cli::try_parse_from(["blobfield", "--trace", "--volume"]).is_err());
    }
}
