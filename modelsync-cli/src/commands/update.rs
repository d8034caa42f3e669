use anyhow::Result;
use modelsync::{DateRange, MaintenanceReport};
use tracing::info;

use super::{Context, Target};

pub async fn run_update(context: &Context, target: &Target, range: DateRange) -> Result<MaintenanceReport> {
    info!(range = %range, batch_size = context.maintenance.batch_size(), "Updating indices");
    Ok(context.maintenance.update(&target.selection(), range).await?)
}
