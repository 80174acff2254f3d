use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use slog::o;
use slog::Drain;
use slog::FnValue;
use slog::Logger;

use crate::error::RegistrationError;

pub type Point = [f64; 3];

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

/// Non-empty, non-comment lines of a text file with their 1-based line
/// numbers.
pub(crate) fn read_content_lines(path: &Path) -> Result<Vec<(usize, String)>, RegistrationError> {
    let name = path.display().to_string();
    let file = File::open(path).map_err(|e| RegistrationError::Io(name.clone(), e))?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RegistrationError::Io(name.clone(), e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        out.push((i + 1, trimmed.to_string()));
    }
    Ok(out)
}

pub fn distance(a: &Point, b: &Point) -> f64 {
    std::iter::zip(a, b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
