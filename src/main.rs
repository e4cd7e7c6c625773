mod cli;
mod core;
mod logging;

use crate::core::error::ExtractError;
use crate::core::terminal;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_main().await {
        if let Some(ExtractError::Cancelled { attempts_used }) = e.downcast_ref::<ExtractError>() {
            terminal::print_warn(&format!(
                "Cancelled after {} attempt(s); nothing was written for the interrupted stage.",
                attempts_used
            ));
            std::process::exit(130);
        }
        terminal::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
