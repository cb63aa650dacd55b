//! Git checkout step: clone the repository into the workspace and check
//! out the requested ref.

use async_trait::async_trait;
use girder_config::WorkerConfig;
use girder_core::{Capability, CapabilitySet, TaskRecord};
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

use crate::leaf::{StepOutcome, StepRunner};
use crate::worker::WorkerContext;

#[derive(Debug, Deserialize)]
struct CheckoutParams {
    repository: String,
    /// Subdirectory of the workspace to clone into.
    #[serde(default, rename = "checkout-dir")]
    checkout_dir: Option<String>,
    /// Ref to check out after cloning.
    #[serde(default = "default_ref", rename = "ref")]
    git_ref: String,
}

fn default_ref() -> String {
    "refs/heads/master".to_owned()
}

pub struct GitCheckout;

#[async_trait]
impl StepRunner for GitCheckout {
    fn kind_capabilities(&self, _config: &WorkerConfig) -> CapabilitySet {
        [Capability::GIT_CHECKOUT_V1].into_iter().collect()
    }

    async fn execute(
        &self,
        _ctx: &WorkerContext,
        record: &mut TaskRecord,
        workspace: &Path,
    ) -> StepOutcome {
        let params: CheckoutParams = match serde_json::from_value(record.params.clone()) {
            Ok(params) => params,
            Err(err) => {
                return StepOutcome::failure(
                    format!("invalid checkout params: {err}"),
                    String::new(),
                );
            }
        };

        let target = match &params.checkout_dir {
            Some(sub) => workspace.join(sub),
            None => workspace.to_owned(),
        };

        let mut console = String::new();
        let cloned = run_git(
            &["clone", &params.repository, &target.to_string_lossy()],
            workspace,
            &mut console,
        )
        .await;
        if !cloned {
            return StepOutcome::failure("git clone failed", console);
        }

        let checked_out = run_git(&["checkout", "-q", &params.git_ref], &target, &mut console).await;
        if !checked_out {
            return StepOutcome::failure(
                format!("git checkout of {} failed", params.git_ref),
                console,
            );
        }

        StepOutcome::success(console)
    }
}

async fn run_git(args: &[&str], cwd: &Path, console: &mut String) -> bool {
    match Command::new("git").args(args).current_dir(cwd).output().await {
        Ok(output) => {
            console.push_str(&String::from_utf8_lossy(&output.stdout));
            console.push_str(&String::from_utf8_lossy(&output.stderr));
            output.status.success()
        }
        Err(err) => {
            console.push_str(&format!("git {}: {err}\n", args.join(" ")));
            false
        }
    }
}
