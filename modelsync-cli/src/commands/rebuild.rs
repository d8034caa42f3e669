//! Rebuild: drift check, clear, full reindex.

use anyhow::Result;
use modelsync::{MaintenanceReport, RebuildOptions};

use super::{confirmer, Context, Target};

pub async fn run_rebuild(
    context: &Context,
    target: &Target,
    options: RebuildOptions,
    noinput: bool,
) -> Result<MaintenanceReport> {
    let confirm = confirmer(noinput);
    Ok(context
        .maintenance
        .rebuild(&target.selection(), options, confirm.as_ref())
        .await?)
}
