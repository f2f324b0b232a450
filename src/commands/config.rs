use clap::{Args, Subcommand};

use crate::commands::{LAB_REQUIREMENTS, LabContext, print_fail, print_ok};
use crate::config;
use crate::error::Result;

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Debug, Subcommand, Clone)]
enum ConfigSubcommand {
    /// Validate the config file and report which labs have their settings
    Check,
}

pub fn run(args: ConfigArgs, ctx: &LabContext) -> Result<()> {
    match args.command {
        ConfigSubcommand::Check => check(ctx),
    }
}

fn check(ctx: &LabContext) -> Result<()> {
    let path = config::config_path()?;
    if ctx.profile.is_some() || path.exists() {
        let path = config::validate_config(ctx.profile.as_deref())?;
        print_ok(format!("config OK: {}", path.display()));
    } else {
        println!("No config file at {} (optional)", path.display());
    }

    for (lab, names) in LAB_REQUIREMENTS {
        let missing = names
            .iter()
            .copied()
            .filter(|name| !ctx.env.is_present(name))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            print_ok(format!("{lab}: ready"));
        } else {
            print_fail(format!("{lab}: missing {}", missing.join(", ")));
        }
    }
    Ok(())
}
