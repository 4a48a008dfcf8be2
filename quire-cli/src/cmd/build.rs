use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use quire_core::SiteBuilder;

use crate::settings::Settings;

pub fn make_subcommand() -> Command {
    Command::new("build")
        .about("Build the documentation site")
        .arg(super::config_file_arg())
        .arg(
            Arg::new("site_dir")
                .short('d')
                .long("site-dir")
                .value_name("DIR")
                .help("Directory to write the site to, replacing site_dir from the config file"),
        )
}

pub fn execute(args: &ArgMatches) -> Result<()> {
    let settings = Settings::load(args)?;
    let config = settings.site_config()?;

    let output = SiteBuilder::new(&config).build()?;

    println!(
        "Built {} pages into {}",
        output.page_count(),
        output.output_dir.display()
    );
    Ok(())
}
