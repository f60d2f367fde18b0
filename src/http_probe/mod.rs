pub mod dns;
pub mod error;
pub mod probe;
pub mod result;
pub mod wire;

pub mod prelude {
    pub use super::error::{Phase, ProbeError};
    pub use super::probe::Prober;
    pub use super::result::{ProbeResult, Resource};
}

use std::fmt::Write;

/// Render an error and its chain of sources on a single line.
pub fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, ": {}", src);
        err = src;
    }
    s
}
