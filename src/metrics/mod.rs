//! Training metrics and logging.
//!
//! - [`IterationSnapshot`]: per-iteration scalars from the training loop
//! - [`ConsoleLogger`]: pretty-printed console output
//! - [`CsvLogger`]: CSV file logging for analysis
//! - [`MultiLogger`]: combine multiple loggers

pub mod logger;

pub use logger::{ConsoleLogger, CsvLogger, IterationSnapshot, MetricsLogger, MultiLogger};
