use std::path::Path;

use etl_config::load_config_from_path;
use etl_config::shared::ReplicatorConfig;

use crate::error::{ReplicatorError, ReplicatorResult};

/// Loads and validates the replicator configuration stored at `path`.
pub fn load_replicator_config(path: &Path) -> ReplicatorResult<ReplicatorConfig> {
    let config =
        load_config_from_path::<ReplicatorConfig>(path).map_err(ReplicatorError::config)?;
    config.validate().map_err(ReplicatorError::config)?;

    Ok(config)
}
