use std::io::{stdout, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tmtc::CatalogStore;
use tracing::warn;

fn description(catalog: &CatalogStore, name: &str) -> Option<String> {
    if let Some(param) = catalog.parameter(name) {
        let mut line = param.description.clone().unwrap_or_default();
        if let Some(unit) = &param.unit {
            line.push_str(&format!(" [{unit}]"));
        }
        return Some(line.trim().to_string());
    }
    catalog.describe(name).map(ToString::to_string)
}

pub fn describe(catalog: &Path, names: &[String]) -> Result<()> {
    let catalog = CatalogStore::load(catalog)
        .with_context(|| format!("failed to load catalog {catalog:?}"))?;
    let mut out = stdout().lock();

    for name in names {
        match description(&catalog, name) {
            Some(text) => writeln!(out, "{name}: {text}").context("writing to stdout")?,
            None => warn!("no description for {name:?}"),
        }
    }
    Ok(())
}
