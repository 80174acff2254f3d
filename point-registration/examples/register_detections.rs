//Register two detection files and write the affine transform between them

use std::path::PathBuf;

use clap::Parser;
use point_registration::{
    affine::{read_affine, write_affine, AffineTransform, TransformKind},
    icp::IcpParameter,
    landmark::read_landmarks,
    registration::{landmark_registration_error, register_point_sets, RegistrationParameter},
};
use rand::{rngs::StdRng, SeedableRng};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    //moving detections, `index x y z scale` rows
    #[arg(long)]
    source: PathBuf,

    //fixed detections
    #[arg(long)]
    target: PathBuf,

    //affine files applied before matching
    #[arg(long)]
    source_pre: Option<PathBuf>,

    #[arg(long)]
    target_pre: Option<PathBuf>,

    //labelled landmarks for reporting the registration error
    #[arg(long, requires = "target_landmarks")]
    source_landmarks: Option<PathBuf>,

    #[arg(long)]
    target_landmarks: Option<PathBuf>,

    #[arg(long, default_value = "affine")]
    transform: TransformKind,

    #[arg(long, default_value_t = 20000)]
    iterations: usize,

    #[arg(long, default_value_t = 4)]
    min_samples: usize,

    #[arg(long, default_value_t = 15.0)]
    inlier_threshold: f64,

    //0 skips ICP
    #[arg(long, default_value_t = 50)]
    icp_iterations: usize,

    #[arg(long)]
    icp_tolerance: Option<f64>,

    #[arg(long, default_value_t = 1.0)]
    source_sampling_factor: f64,

    #[arg(long, default_value_t = 1.0)]
    target_sampling_factor: f64,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let source = read_landmarks(&args.source)?;
    let target = read_landmarks(&args.target)?;
    let source_pre = args.source_pre.as_deref().map(read_affine).transpose()?;
    let target_pre = args.target_pre.as_deref().map(read_affine).transpose()?;

    let mut param = RegistrationParameter::with_kind(args.transform);
    param.ransac.iterations = args.iterations;
    param.ransac.min_samples = args.min_samples;
    param.ransac.inlier_threshold = args.inlier_threshold;
    param.icp = if args.icp_iterations == 0 {
        None
    } else {
        Some(IcpParameter {
            iterations: args.icp_iterations,
            tolerance: args.icp_tolerance,
            kind: args.transform,
        })
    };
    param.source_sampling.factor = args.source_sampling_factor;
    param.target_sampling.factor = args.target_sampling_factor;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let result = register_point_sets(
        &source.positions(),
        &target.positions(),
        source_pre.as_ref(),
        target_pre.as_ref(),
        &param,
        &mut rng,
    )?;
    println!(
        "{} matches, {} inliers, axis flipped: {}",
        result.matches.len(),
        result.num_inliers(),
        result.flipped_axis
    );
    if let Some(residual) = result.icp_residuals.last() {
        println!("icp mean residual {}", residual);
    }
    write_affine(&args.output, &result.to_target)?;

    if let (Some(source_path), Some(target_path)) = (&args.source_landmarks, &args.target_landmarks) {
        let identity = AffineTransform::identity(param.dims)?;
        let error = landmark_registration_error(
            &read_landmarks(source_path)?,
            &read_landmarks(target_path)?,
            &result.to_target,
            &identity,
            &identity,
        )?;
        println!("landmark registration error {}", error);
    }
    Ok(())
}
