use std::borrow::Cow;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::settings::Settings;
use crate::vars::persist::LineCodec;
use crate::vars::table::ProcessVariableTable;
use crate::vars::value::Value;

/// One variable as `dump --json` prints it.
#[derive(Serialize)]
struct DumpRow<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    spec: String,
    value: Option<&'a Value>,
    content: Cow<'a, str>,
}

/// Load a saved table; the pid inside it is irrelevant for printing.
pub fn load_saved(file: &Path, codec: &LineCodec) -> Result<ProcessVariableTable> {
    let mut table = ProcessVariableTable::new(0, None);
    table
        .load(file, codec)
        .with_context(|| format!("failed to load {}", file.display()))?;
    Ok(table)
}

pub fn dump(settings: &Settings, file: &Path, delimiter: Option<char>, json: bool, out: &mut impl Write) -> Result<()> {
    let codec = match delimiter {
        Some(d) => LineCodec::new(d)?,
        None => settings.codec()?,
    };
    let table = load_saved(file, &codec)?;

    if json {
        let rows: Vec<DumpRow<'_>> = table
            .records()
            .map(|rec| DumpRow {
                name: &rec.name,
                spec: rec.spec().to_string(),
                value: rec.peek(),
                content: String::from_utf8_lossy(rec.content()),
            })
            .collect();
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }

    let width = table.names().map(str::len).max().unwrap_or(0);
    for rec in table.records() {
        let shown = rec.formatted().replace('\\', "\\\\").replace('\n', "\\n");
        writeln!(out, "{:<width$}  {:<12}  {}", rec.name, rec.spec().to_string(), shown, width = width)?;
    }
    Ok(())
}

pub fn print_config(settings: &Settings, origin: Option<&Path>, out: &mut impl Write) -> Result<()> {
    match origin {
        Some(path) => writeln!(out, "# loaded from {}", path.display())?,
        None => writeln!(out, "# built-in defaults")?,
    }
    write!(out, "{}", settings.to_toml()?)?;
    Ok(())
}

#[cfg(feature = "mount")]
pub fn mount(settings: &Settings, mountpoint: &Path, allow_other: bool, save_dir: Option<&Path>) -> Result<()> {
    crate::mount::run(settings, mountpoint, allow_other, save_dir)
}

#[cfg(not(feature = "mount"))]
pub fn mount(_settings: &Settings, mountpoint: &Path, _allow_other: bool, _save_dir: Option<&Path>) -> Result<()> {
    anyhow::bail!(
        "cannot mount at {}: fusevars was built without the `mount` feature",
        mountpoint.display()
    )
}
