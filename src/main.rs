//! Kodegen Bundler Inject - inject code into iOS app packages and re-sign them.

use kodegen_bundler_inject::cli;
use kodegen_bundler_inject::cli::{OutputManager, written};
use std::process;

#[tokio::main]
async fn main() {
    match cli::run().await {
        Ok(exit_code) => {
            process::exit(exit_code);
        }
        Err(e) => {
            // Fatal errors are never quiet
            let output = OutputManager::new(false, false);
            output.error(&format!("Fatal error: {e}"));

            let suggestions = e.recovery_suggestions();
            if !suggestions.is_empty() {
                written(output.println("\n💡 Recovery suggestions:"));
                for suggestion in suggestions {
                    written(output.indent(&suggestion));
                }
            }

            process::exit(1);
        }
    }
}
