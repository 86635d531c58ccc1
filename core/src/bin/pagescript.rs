//! pagescript CLI
//!
//! Evaluates condition expressions, shows token streams and interpolation
//! results, and dry-runs action definition files without a browser.

use pagescript_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
