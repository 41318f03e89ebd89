pub mod error_logging;
