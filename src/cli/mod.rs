mod app;
mod commands;
mod context;
mod dispatch;
mod env;
mod models;
mod output;
mod runtime;
mod serve;
mod vault;

pub use app::run;
pub use env::CliArgs;
pub use output::OutputFormat;
