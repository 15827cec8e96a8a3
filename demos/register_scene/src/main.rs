use argh::FromArgs;
use std::path::PathBuf;

mod scene;

use scene::Scene;

/// Estimates the rigid transform of a scene file with RANSAC
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the scene json file
    #[argh(positional)]
    scene_path: PathBuf,

    /// override the random seed stored in the scene
    #[argh(option, short = 's')]
    seed: Option<u64>,

    /// override the inlier threshold stored in the scene
    #[argh(option, short = 't')]
    threshold: Option<f64>,

    /// write the report as json to this path
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut scene = Scene::from_file(&args.scene_path)?;
    if let Some(seed) = args.seed {
        scene.seed = seed;
    }
    if let Some(threshold) = args.threshold {
        scene.ransac.threshold = threshold;
    }

    log::info!(
        "registering {} correspondences from {}",
        scene.num_correspondences(),
        args.scene_path.display()
    );

    let report = scene.run()?;

    println!("transform:");
    for row in report.matrix.iter() {
        println!("  [{:>10.6} {:>10.6} {:>10.6} {:>10.6}]", row[0], row[1], row[2], row[3]);
    }
    println!(
        "inliers: {}/{} rmse: {:.6} models: {}",
        report.inliers.len(),
        scene.num_correspondences(),
        report.rmse,
        report.num_models
    );

    if let Some(output) = args.output {
        let file = std::fs::File::create(&output)?;
        serde_json::to_writer_pretty(file, &report)?;
        log::info!("report written to {}", output.display());
    }

    Ok(())
}
