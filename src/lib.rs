//! Parses Android bugreports, finds the ANR they recorded and works out from
//! the logs and thread dumps what most likely caused it.
//!
//! The pipeline runs in one pass: [`lines::read_lines`] loads the input,
//! [`parsers::BugreportParser`] builds the [`parsers::Bugreport`] model (an
//! optional monkey log is folded in by [`parsers::MonkeyParser`]),
//! [`inspector::Inspector`] annotates it and [`html_output::HtmlRenderer`]
//! writes the report.

pub mod driver;
pub mod error;
pub mod file_loader;
pub mod html_output;
pub mod inspector;
pub mod lines;
pub mod options;
pub mod parsers;
pub mod timing;
pub mod zip_utils;

pub use driver::{analyse, run, Outcome};
pub use error::{BugreportError, Result};
pub use options::{parse_args, Invocation, Options};
