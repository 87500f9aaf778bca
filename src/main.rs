use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use mixmusic::{config, logging, render, Cli};

fn run(cli: Cli) -> Result<()> {
    let options = config::load_config(cli.config.as_deref())?;
    let options = cli.merge_into_options(options)?;
    logging::init_logging(options.log_level)?;

    log::debug!("Options: {:?}", options);

    let mut music = render::open_music(&cli.input, &options)?;

    if cli.info {
        print!("{}", render::describe(music.as_ref()));
        return Ok(());
    }

    let output = cli
        .output
        .as_deref()
        .context("An output file is required unless --info is given")?;
    let stats = render::render_to_wav(music.as_mut(), &options, output)?;
    if !stats.finished {
        log::info!("Stopped before the end of the track");
    }
    Ok(())
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mixmusic-render: {:#}", e);
            let last = mixmusic::error::get_error();
            if !last.is_empty() {
                eprintln!("last error: {}", last);
            }
            ExitCode::FAILURE
        }
    }
}
