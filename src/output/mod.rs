//! Output formatting module
//!
//! Console progress and the renderings of final results.

mod console;
mod formatter;

pub use console::ConsoleListener;
pub use formatter::{write_result_file, OutputFormat, ResultFormatter};
