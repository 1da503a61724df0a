pub mod check;
pub mod registry;
pub mod run;

use anyhow::Context;
use relay_core::scenario::Scenario;
use std::path::Path;

pub(crate) fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    Scenario::load(path).with_context(|| format!("failed to load scenario {}", path.display()))
}
