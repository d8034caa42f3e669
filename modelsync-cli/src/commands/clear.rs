use anyhow::Result;
use modelsync::MaintenanceReport;

use super::{confirmer, Context, Target};

pub async fn run_clear(context: &Context, target: &Target, noinput: bool) -> Result<MaintenanceReport> {
    let confirm = confirmer(noinput);
    Ok(context
        .maintenance
        .clear(&target.selection(), confirm.as_ref())
        .await?)
}
