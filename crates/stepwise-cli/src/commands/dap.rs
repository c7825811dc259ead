//! Dap command - serve one session on stdin/stdout
//!
//! This is how IDEs normally start an adapter: they spawn the binary and
//! speak DAP over its standard streams. The process exits when the IDE
//! disconnects or closes the pipe.

use anyhow::Result;
use std::sync::Arc;
use stepwise_config::Config;
use stepwise_dap::{serve_stdio, SessionOutcome};
use stepwise_logging::info;

pub async fn run(config: Arc<Config>) -> Result<()> {
    match serve_stdio(config).await? {
        SessionOutcome::Completed => info!("DAP session completed"),
        SessionOutcome::NoSession => info!("stdin closed before any request"),
    }
    Ok(())
}
