mod app;
mod args;
mod editor;
mod error;
mod filter;
mod input;
mod model;
mod parsers;
mod script;
mod ui;

use std::{
    fs::{self, File},
    io,
    path::Path,
    sync::{Mutex, mpsc},
};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing_subscriber::EnvFilter;

use crate::{
    app::{App, init_parsers, run_app},
    args::Args,
    input::{ViewMode, resolve_sources},
    script::Limits,
};

/// Logs go to a file only; the terminal belongs to the TUI.
fn init_logging(path: &Path, level: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("opening log file {}", path.display()))?;
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    if let Some(path) = &args.log_file {
        init_logging(path, &args.log_level)?;
    }

    let sources = resolve_sources(&args)?;
    tracing::info!(sources = sources.len(), consolidated = args.consolidated, "starting");
    let (parsers, store, notice) = init_parsers(args.parsers.as_deref(), Limits::default());
    let mode = if args.consolidated {
        ViewMode::Consolidated
    } else {
        ViewMode::ByUpload
    };
    let mut app = App::new(sources, mode, parsers, store, args.export_dir.clone());
    app.notice = notice;

    let (tx, rx) = mpsc::channel();

    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("entering alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal")?;

    let res = run_app(&mut terminal, &mut app, tx, rx);

    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("leaving alternate screen")?;
    terminal.show_cursor().ok();

    if let Err(err) = res {
        tracing::error!(error = %err, "ui loop failed");
        eprintln!("error: {err:?}");
    }

    Ok(())
}
