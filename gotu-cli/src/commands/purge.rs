//! Purge command implementation.

use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme};
use gotu::PurgeVariant;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;

use crate::config::Config;
use crate::{Cli, CliError, PurgeGuard, open_session, use_fancy_output, was_interrupted};

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "confirmation needs an interactive terminal, pass --yes to skip it".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Purge cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Confirmation prompt failed: {io_err}")).into()
            }
        },
    }
}

/// Whether the user must be asked before erasing.
///
/// Non-interactive runs never prompt, so they must pass `--yes`.
fn needs_confirmation(yes: bool, non_interactive: bool) -> Result<bool> {
    match (yes, non_interactive) {
        (true, _) => Ok(false),
        (false, true) => Err(CliError::Usage(
            "purge erases all recorded data, pass --yes in non-interactive mode".to_string(),
        )
        .into()),
        (false, false) => Ok(true),
    }
}

/// Erase all recorded data.
pub(crate) fn cmd_purge(
    cli: &Cli,
    config: &Config,
    yes: bool,
    variant: Option<PurgeVariant>,
) -> Result<()> {
    let confirm = needs_confirmation(yes, cli.non_interactive)?;
    if confirm {
        ensure_interactive_terminal()?;
    }

    let (mut session, _) = open_session(cli, config, variant)?;
    let model = session.model();
    let records = session
        .count()
        .context("Failed to read the record count")?;

    if confirm {
        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Erase all {records} records from the {model}?"))
            .default(false)
            .interact_opt()
            .map_err(map_prompt_error)?
            .unwrap_or(false);
        if !confirmed {
            return Err(CliError::Cancelled("Purge cancelled".to_string()).into());
        }
    }

    // Ctrl-C during the prompt cancels. Past this point it is ignored.
    if was_interrupted() {
        return Err(CliError::Cancelled("Purge cancelled".to_string()).into());
    }

    if !cli.quiet {
        eprintln!(
            "{} Purging {} ({} sequence), do not disconnect the logger",
            style("⏳").yellow(),
            style(model).cyan(),
            session.purge_variant()
        );
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(u64::from(model.block_count()));
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} blocks")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let result = {
        let _guard = PurgeGuard::new();
        session.purge(&mut |scanned, total| {
            pb.set_length(u64::from(total));
            pb.set_position(u64::from(scanned));
        })
    };
    pb.finish_and_clear();
    let report = result.context("Purge failed")?;

    session
        .close()
        .context("Failed to close the logger")?;

    if !cli.quiet {
        let used = report
            .first_dirty
            .map_or_else(|| "none".to_string(), |block| block.to_string());
        eprintln!(
            "{} Purge complete: {} block(s) erased, highest used block {used}",
            style("✓").green(),
            report.erased
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_skips_confirmation() {
        assert!(!needs_confirmation(true, false).unwrap());
        assert!(!needs_confirmation(true, true).unwrap());
    }

    #[test]
    fn test_interactive_run_confirms() {
        assert!(needs_confirmation(false, false).unwrap());
    }

    #[test]
    fn test_non_interactive_without_yes_is_usage_error() {
        let err = needs_confirmation(false, true).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }
}
