//Detect nuclei in a volume and write the curated detections

use std::path::PathBuf;

use clap::Parser;
use nuclei_detection::{
    detection_io::{instance_mask, write_instance_mask, write_nuclei, write_session_csv, write_tgmm},
    nuclei_detector::{detect_nuclei, DetectionParameter},
    utils::ImageUtil,
    volume::ScalarVolume,
};
use rand::{rngs::StdRng, SeedableRng};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    //volume as .npy, or a list of 2-D slices
    #[arg(short, long, num_args = 1.., required = true)]
    input: Vec<PathBuf>,

    //output directory
    #[arg(short, long)]
    output_dir: PathBuf,

    #[arg(long, default_value_t = 5.0)]
    min_scale: f64,

    #[arg(long, default_value_t = 1.0)]
    step_scale: f64,

    #[arg(long, default_value_t = 9.0)]
    max_scale: f64,

    #[arg(long, default_value_t = 2)]
    anisotropic_axis: usize,

    #[arg(long, default_value_t = 1.0)]
    sampling_factor: f64,

    //detect dark blobs on a bright background
    #[arg(long)]
    dark_blobs: bool,

    #[arg(long, default_value_t = 0.05)]
    overlap_threshold: f64,

    //fixed response threshold instead of Otsu's
    #[arg(long)]
    threshold: Option<f32>,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let data = if args.input.len() == 1
        && args.input[0].extension().map_or(false, |e| e == "npy")
    {
        ImageUtil::read_npy_volume(&args.input[0])?
    } else {
        ImageUtil::read_slice_stack(&args.input)?.into_dyn()
    };
    let axis = args.anisotropic_axis.min(data.ndim() - 1);
    let volume = ScalarVolume::new(data, axis, args.sampling_factor)?;

    let mut param = DetectionParameter::new(args.min_scale, args.step_scale, args.max_scale);
    param.bright_blobs = !args.dark_blobs;
    param.overlap_threshold = args.overlap_threshold;
    param.response_threshold = args.threshold;
    let mut rng = StdRng::seed_from_u64(args.seed);
    let detection = detect_nuclei(&volume, &param, &mut rng)?;
    let session = &detection.session;
    println!(
        "threshold {}, {} nuclei detected",
        session.current_threshold(),
        session.number_of_blobs()
    );

    std::fs::create_dir_all(&args.output_dir)?;
    let params = session.params();
    write_nuclei(&args.output_dir.join("nuclei.txt"), session.thresholded(), params)?;
    write_session_csv(&args.output_dir.join("detections.csv"), session)?;
    write_tgmm(&args.output_dir.join("tgmm.xml"), session.thresholded(), params)?;
    let mask = instance_mask(session.thresholded(), params, volume.shape())?;
    write_instance_mask(&args.output_dir.join("instance_mask.npy"), &mask)?;
    Ok(())
}
