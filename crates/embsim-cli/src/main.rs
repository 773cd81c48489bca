//! embsim CLI - headless physics driver
//!
//! Loads a TOML scene, steps it and prints object states or ray hits.

use anyhow::{bail, Result};
use clap::{ArgAction, Parser, Subcommand};
use embsim_physics::{Ray, STAGE_ID};
use nalgebra::{Point3, Vector3};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod scene;

use scene::{LoadedScene, SceneFile};

#[derive(Parser)]
#[command(name = "embsim")]
#[command(about = "Headless physics driver for embsim scenes", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Step a scene and print the final object states as JSON
    Run {
        /// Scene file (.toml)
        scene: PathBuf,
        /// Simulated seconds
        #[arg(short, long, default_value_t = 1.0)]
        seconds: f64,
        /// Calls to step_physics per simulated second
        #[arg(long, default_value_t = 60.0)]
        frame_rate: f64,
        /// Write the keyframe here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cast a ray into a scene and list every hit
    Raycast {
        /// Scene file (.toml)
        scene: PathBuf,
        /// Ray origin as x,y,z
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        origin: [f32; 3],
        /// Ray direction as x,y,z
        #[arg(long, value_parser = parse_vec3, allow_hyphen_values = true)]
        direction: [f32; 3],
        /// Maximum distance in units of the direction length
        #[arg(long, default_value_t = 100.0)]
        max_distance: f32,
    },
    /// Summarize the objects in a scene
    Info {
        /// Scene file (.toml)
        scene: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            scene,
            seconds,
            frame_rate,
            output,
        } => run(&scene, seconds, frame_rate, output.as_deref())?,
        Commands::Raycast {
            scene,
            origin,
            direction,
            max_distance,
        } => raycast(&scene, origin, direction, max_distance)?,
        Commands::Info { scene } => show_info(&scene)?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_vec3(s: &str) -> Result<[f32; 3], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, z] = parts.as_slice() else {
        return Err(format!("expected x,y,z but got '{}'", s));
    };
    let parse = |v: &str| v.parse::<f32>().map_err(|e| format!("'{}': {}", v, e));
    Ok([parse(x)?, parse(y)?, parse(z)?])
}

fn load(path: &Path) -> Result<LoadedScene> {
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    SceneFile::load(path)?.build(base_dir)
}

fn run(path: &Path, seconds: f64, frame_rate: f64, output: Option<&Path>) -> Result<()> {
    if frame_rate <= 0.0 {
        bail!("Frame rate must be positive, got {}", frame_rate);
    }
    let mut loaded = load(path)?;
    let frames = (seconds * frame_rate).round().max(0.0) as usize;
    let dt = 1.0 / frame_rate;

    for frame in 0..frames {
        loaded.manager.step_physics(dt);
        if frame % frame_rate.max(1.0) as usize == 0 {
            debug!(
                frame,
                world_time = loaded.manager.world_time(),
                active = loaded.manager.check_active_objects(),
                "stepped"
            );
        }
    }
    info!(
        world_time = loaded.manager.world_time(),
        contacts = loaded.manager.num_active_contact_points(),
        "simulation finished"
    );

    let keyframe = loaded.manager.capture_state();
    let json = keyframe.to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            println!("Wrote {} object states to {}", keyframe.objects.len(), path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn raycast(path: &Path, origin: [f32; 3], direction: [f32; 3], max_distance: f32) -> Result<()> {
    let direction = Vector3::from(direction);
    if direction.norm_squared() == 0.0 {
        bail!("Ray direction must be non-zero");
    }
    let loaded = load(path)?;
    let ray = Ray::new(Point3::from(origin), direction);
    let results = loaded.manager.cast_ray(&ray, max_distance);

    if !results.has_hits() {
        println!("No hits");
        return Ok(());
    }
    for hit in &results.hits {
        let target = if hit.object_id == STAGE_ID {
            "stage".to_string()
        } else {
            match hit.link_id {
                Some(link) => format!("object {} link {}", hit.object_id, link),
                None => format!("object {}", hit.object_id),
            }
        };
        println!(
            "{:>8.4}  {:<20} point ({:.3}, {:.3}, {:.3})  normal ({:.3}, {:.3}, {:.3})",
            hit.ray_distance,
            target,
            hit.point.x,
            hit.point.y,
            hit.point.z,
            hit.normal.x,
            hit.normal.y,
            hit.normal.z,
        );
    }
    Ok(())
}

fn show_info(path: &Path) -> Result<()> {
    let loaded = load(path)?;
    let manager = &loaded.manager;

    println!("Scene: {}", path.display());
    println!("Simulator: {:?}", manager.physics_library());
    println!("Timestep: {} s", manager.timestep());
    if let Some(stage) = manager.stage() {
        println!(
            "Stage: {} ({} colliders, collidable: {})",
            stage.handle(),
            stage.num_colliders(),
            manager.stage_is_collidable()
        );
    }
    println!("Objects: {}", manager.num_objects());

    for id in manager.existing_object_ids() {
        let motion = manager.object_motion_type(id);
        if let Some(object) = manager.articulated_object(id) {
            println!(
                "  {:>3}  articulated  {:<12} {:?}  links: {}  dofs: {}",
                id,
                object.handle(),
                motion,
                object.num_links(),
                object.num_dofs()
            );
        } else if let Some(object) = manager.rigid_object(id) {
            let t = object.translation();
            println!(
                "  {:>3}  rigid        {:<12} {:?}  at ({:.2}, {:.2}, {:.2})",
                id,
                object.handle(),
                motion,
                t.x,
                t.y,
                t.z
            );
        }
    }
    debug!(articulated = ?loaded.articulated_ids, nodes = loaded.graph.borrow().len(), "scene graph");
    Ok(())
}
