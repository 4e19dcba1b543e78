use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use recomp_core::context::reg;
use recomp_core::logging::{LogConfig, LogLevel};
use recomp_core::{RecompContext, Rdram};
use sssv_patches::collision::trophy_collision_guard;
use sssv_patches::gbi;
use sssv_patches::scene::{emitted_commands, sprite_row, Scene, GFX_SLOT};
use sssv_patches::widescreen::{AspectMode, WidescreenState};
use sssv_patches::{check_image, BillboardControls, BillboardRewriter, CallSite, RewriteSettings};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum Site {
    Stars,
    EnergyItems,
    Flowers,
    Collectibles,
    Trees,
    FovMasks,
}

impl From<Site> for CallSite {
    fn from(site: Site) -> Self {
        match site {
            Site::Stars => CallSite::Stars,
            Site::EnergyItems => CallSite::EnergyItems,
            Site::Flowers => CallSite::Flowers,
            Site::Collectibles => CallSite::Collectibles,
            Site::Trees => CallSite::Trees,
            Site::FovMasks => CallSite::FovMasks,
        }
    }
}

/// Drive the billboard hooks against a synthetic scene
#[derive(Parser)]
struct Args {
    /// Number of frames to run
    #[arg(long, default_value_t = 3)]
    frames: u64,

    /// Sprites drawn per frame
    #[arg(long, default_value_t = 24)]
    sprites: usize,

    /// Call site the sprites are drawn through
    #[arg(long, value_enum, default_value_t = Site::EnergyItems)]
    site: Site,

    /// Load billboard controls from this JSON file
    #[arg(long)]
    controls: Option<PathBuf>,

    /// Write the effective controls to this JSON file
    #[arg(long)]
    save_controls: Option<PathBuf>,

    /// Expand to a window size, e.g. 1920x1080
    #[arg(long)]
    widescreen: Option<String>,

    /// Enable billboard debug logging (stats reports, energy-item trace)
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Patch log level: off, error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// Write patch logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print each frame's display list
    #[arg(long, default_value_t = false)]
    dump_dl: bool,

    /// Dump per-site stats to this file as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,
}

fn parse_window(s: &str) -> Result<(i32, i32)> {
    let (w, h) = s
        .split_once('x')
        .with_context(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    Ok((w.trim().parse()?, h.trim().parse()?))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(level) = args.log_level.as_deref() {
        let level = LogLevel::from_str(level)
            .with_context(|| format!("unknown log level {:?}", level))?;
        LogConfig::global().set_global_level(level);
    }
    if let Some(path) = args.log_file.as_ref() {
        LogConfig::global()
            .set_log_file(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
    }

    let mut controls = match args.controls.as_ref() {
        Some(path) => BillboardControls::load(path),
        None => BillboardControls::default(),
    };
    if args.debug {
        controls.debug_logging = true;
    }
    if let Some(path) = args.save_controls.as_ref() {
        controls
            .save(path)
            .with_context(|| format!("saving controls to {}", path.display()))?;
    }

    let settings = RewriteSettings::default();
    let mut mem = Rdram::extended();
    check_image(&mem, &settings)?;

    let mut widescreen = WidescreenState::new();
    if let Some(spec) = args.widescreen.as_deref() {
        let (w, h) = parse_window(spec)?;
        widescreen.force_widescreen_state(&mut mem, AspectMode::Expand, w, h);
        log::info!(
            "widescreen: aspect {:.3}, target width {}",
            widescreen.aspect_ratio,
            widescreen.target_width
        );
    }

    let scene = Scene::default();
    scene.install(&mut mem);
    let sprites = sprite_row(args.sprites);
    let site = CallSite::from(args.site);
    let mut rewriter = BillboardRewriter::new(settings, controls);

    let mut dl_ctx = RecompContext::new();
    dl_ctx.gpr[reg::A0] = GFX_SLOT;

    for frame in 0..args.frames {
        scene.begin_frame(&mut mem, frame);
        if trophy_collision_guard(&mut mem) {
            log::debug!("frame {}: trophy hitbox restored", frame);
        }
        if widescreen.enable_extended_gbi(&mut mem, &dl_ctx).is_none() {
            log::warn!("frame {}: no room for the display list prologue", frame);
        }

        let mut outcomes: BTreeMap<String, u32> = BTreeMap::new();
        for sprite in &sprites {
            let ctx = scene.sprite_context(&mut mem, sprite);
            let name = match rewriter.hook(site, &mut mem, &ctx) {
                Some(outcome) => outcome.name(),
                None => "not_rewritten",
            };
            *outcomes.entry(name.to_string()).or_default() += 1;
        }

        let cmds = emitted_commands(&mem);
        log::info!(
            "frame {}: {} commands, pool {}/{} slots, {:?}",
            frame,
            cmds.len(),
            rewriter.engine().allocator().used_slots(),
            rewriter.engine().allocator().capacity_slots(),
            outcomes
        );
        if args.dump_dl {
            println!("Frame {} display list:", frame);
            for line in gbi::disassemble(&cmds) {
                println!("  {}", line);
            }
        }
    }

    let cache = rewriter.engine().cache();
    log::info!(
        "cache: {} entries, {} hits, {} misses, {} evictions",
        cache.len(),
        cache.hits(),
        cache.misses(),
        cache.evictions()
    );

    if let Some(path) = args.stats_json.as_ref() {
        let mut f = File::create(path)?;
        write!(f, "{}", serde_json::to_string_pretty(&rewriter.snapshots())?)?;
    }

    Ok(())
}
