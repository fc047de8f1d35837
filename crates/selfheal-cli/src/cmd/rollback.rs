use crate::cmd::execute::print_summary;
use crate::output::print_json;
use crate::services::{block_on, open_engine};
use std::path::Path;
use uuid::Uuid;

pub fn run(root: &Path, id: Uuid, by: &str, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let summary = block_on(engine.rollback(id, by))??;
    if json {
        print_json(&summary)
    } else {
        print_summary(&summary);
        Ok(())
    }
}
