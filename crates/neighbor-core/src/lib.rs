pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod dialog;
pub mod filter;
pub mod render;
pub mod seed;
pub mod store;
pub mod task;
pub mod user;

use std::ffi::OsString;
use std::io::{
  self,
  IsTerminal,
  Write
};

use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting neighbor"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  if cli.mock {
    cfg.apply_overrides([(
      "seed.source".to_string(),
      "mock".to_string()
    )]);
  }

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv =
    cli::Invocation::parse(cli.rest)?;

  let mut shell =
    commands::Shell::new(cfg, renderer)?;
  shell.reseed()?;
  if let Some(message) =
    &shell.app.load_error
  {
    eprintln!("{message}");
  }

  let stdout = io::stdout();
  let mut out = stdout.lock();
  match inv {
    | cli::Invocation::Interactive => {
      let stdin = io::stdin();
      let prompt = stdin.is_terminal();
      commands::run_repl(
        &mut shell,
        stdin.lock(),
        &mut out,
        &mut io::stderr(),
        prompt
      )?;
    }
    | cli::Invocation::Command {
      name,
      args
    } => {
      commands::dispatch(
        &mut shell, &mut out, &name,
        &args
      )?;
    }
  }
  out.flush()?;

  info!("done");
  Ok(())
}
