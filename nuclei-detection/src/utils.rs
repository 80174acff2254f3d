use std::path::Path;

use itertools::Itertools;
use ndarray::{Array2, Array3, ArrayD, Axis};
use ndarray_npy::{read_npy, write_npy, ReadNpyError};
use slog::o;
use slog::Drain;
use slog::FnValue;
use slog::Logger;

use crate::error::DetectionError;

pub struct ImageUtil {}
impl ImageUtil {
    /// Read one grayscale slice as an `(x, y)` indexed array.
    pub fn read_gray_slice(path: &Path) -> Result<Array2<f32>, DetectionError> {
        let name = path.display().to_string();
        let image = image::open(path)
            .map_err(|e| DetectionError::Image(name.clone(), e))?
            .into_luma16();
        let (width, height) = image.dimensions();
        let samples = image.into_raw().into_iter().map(f32::from).collect_vec();
        let slice = Array2::from_shape_vec((height as usize, width as usize), samples)
            .map_err(|e| DetectionError::InvalidVolume(format!("{}: {}", name, e)))?;
        // row-major (y, x) to (x, y)
        Ok(slice.reversed_axes().as_standard_layout().to_owned())
    }

    /// Stack 2-D slices along a trailing z axis, giving an `(x, y, z)` volume.
    pub fn read_slice_stack<P: AsRef<Path>>(paths: &[P]) -> Result<Array3<f32>, DetectionError> {
        if paths.is_empty() {
            return Err(DetectionError::InvalidVolume(
                "no slices to stack".to_string(),
            ));
        }
        let slices = paths
            .iter()
            .map(|p| ImageUtil::read_gray_slice(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let views = slices.iter().map(|s| s.view()).collect_vec();
        ndarray::stack(Axis(2), &views)
            .map_err(|e| DetectionError::InvalidVolume(format!("slice shapes differ: {}", e)))
    }

    /// Load a volume from `.npy`, accepting `f32`, `u16` and `u8` element
    /// types.
    pub fn read_npy_volume(path: &Path) -> Result<ArrayD<f32>, DetectionError> {
        let name = path.display().to_string();
        let npy_error = |e: ReadNpyError| DetectionError::Npy(name.clone(), e.to_string());
        match read_npy::<_, ArrayD<f32>>(path) {
            Ok(data) => return Ok(data),
            Err(ReadNpyError::WrongDescriptor(_)) => {}
            Err(e) => return Err(npy_error(e)),
        }
        match read_npy::<_, ArrayD<u16>>(path) {
            Ok(data) => return Ok(data.mapv(f32::from)),
            Err(ReadNpyError::WrongDescriptor(_)) => {}
            Err(e) => return Err(npy_error(e)),
        }
        read_npy::<_, ArrayD<u8>>(path)
            .map(|data| data.mapv(f32::from))
            .map_err(npy_error)
    }

    pub fn write_npy_array<T: ndarray_npy::WritableElement>(
        path: &Path,
        data: &ArrayD<T>,
    ) -> Result<(), DetectionError> {
        write_npy(path, data).map_err(|e| DetectionError::Npy(path.display().to_string(), e.to_string()))
    }
}

pub fn set_log_config() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(
        drain,
        o!("place" =>
         FnValue(move |info| {
             format!("{}:{} {}",
                     info.file(),
                     info.line(),
                     info.module(),
                     )
         })
        ),
    )
}
