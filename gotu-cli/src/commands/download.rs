//! Get, info and dump command implementations.

use anyhow::{Context, Result};
use console::style;
use gotu::{IdentifyInfo, Model, PurgeVariant};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, gpx, open_session, use_fancy_output};

fn record_progress_bar(cli: &Cli, total: u32) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(u64::from(total));
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Download all tracks into a GPX file.
pub(crate) fn cmd_get(cli: &Cli, config: &Config, dest: &Path) -> Result<()> {
    let (mut session, _) = open_session(cli, config, None)?;

    let mut records = session
        .records()
        .context("Failed to read the record count")?;
    let total = records.total();
    if !cli.quiet {
        eprintln!("{} {total} records on the device", style("ℹ").blue());
    }

    let pb = record_progress_bar(cli, total);
    let tracks = gotu::track::assemble(records.by_ref().inspect(|_| pb.inc(1))).inspect(|track| {
        if let Ok(track) = track {
            pb.suspend(|| info!("Importing track: {track}"));
        }
    });
    let result = gpx::write_gpx_file(dest, tracks, config.download.track_name_prefix());
    pb.finish_and_clear();
    let written = result?;

    session
        .close()
        .context("Failed to close the logger")?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {written} track(s) to {}",
            style("✓").green(),
            style(dest.display()).cyan()
        );
    }
    Ok(())
}

fn info_json(identity: &IdentifyInfo, model: Model, variant: PurgeVariant, records: u32) -> serde_json::Value {
    serde_json::json!({
        "serial": identity.serial,
        "firmware": format!("{}.{:02}", identity.version_major, identity.version_minor),
        "identify_model": identity.model,
        "usb_library": identity.usb_library,
        "model": model.name(),
        "model_code": model.code(),
        "blocks": model.block_count(),
        "purge_variant": variant.to_string(),
        "records": records,
    })
}

/// Show identification, model and record count.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let (mut session, identity) = open_session(cli, config, None)?;
    let records = session
        .count()
        .context("Failed to read the record count")?;
    let model = session.model();
    let variant = session.purge_variant();

    if json {
        let value = info_json(&identity, model, variant, records);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("{}", style("Device Information").bold().underlined());
    println!("  Model:         {} (code {:#04x})", style(model).cyan(), model.code());
    println!("  Serial:        {}", identity.serial);
    println!(
        "  Firmware:      {}.{:02}",
        identity.version_major, identity.version_minor
    );
    println!("  Identify code: {:#06x}", identity.model);
    println!("  USB library:   {:#06x}", identity.usb_library);
    println!("  Flash blocks:  {}", model.block_count());
    println!("  Purge:         {variant}");
    println!("  Records:       {records}");
    Ok(())
}

/// List every record on the device, including invalid ones.
pub(crate) fn cmd_dump(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let (mut session, _) = open_session(cli, config, None)?;
    let records = session
        .records()
        .context("Failed to read the record count")?;

    if json {
        let all = records
            .collect::<gotu::Result<Vec<_>>>()
            .context("Download failed")?;
        println!("{}", serde_json::to_string_pretty(&all)?);
        return Ok(());
    }

    for record in records {
        let record = record.context("Download failed")?;
        let validity = if record.valid { ' ' } else { '!' };
        println!("{:>6}{validity} {record}", record.index);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_json_fields() {
        let identity = IdentifyInfo {
            serial: 123_456,
            version_major: 2,
            version_minor: 5,
            model: 0x0014,
            usb_library: 0x0100,
        };
        let value = info_json(&identity, Model::Gt200, PurgeVariant::Generic, 42);

        assert_eq!(value["serial"], 123_456);
        assert_eq!(value["firmware"], "2.05");
        assert_eq!(value["model"], "GT-200");
        assert_eq!(value["model_code"], Model::Gt200.code());
        assert_eq!(value["blocks"], Model::Gt200.block_count());
        assert_eq!(value["purge_variant"], PurgeVariant::Generic.to_string());
        assert_eq!(value["records"], 42);
    }
}
