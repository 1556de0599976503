use std::{env, fs, path::Path, process::Command};

use anyhow::{Context, Result};
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::Backend};

use crate::model::Event;

/// Starter text for a new parser.
pub const NEW_PARSER_TEMPLATE: &str = r"function tensorShape(x) {
  // Extract the content between the square brackets
  const match = x.match(/Tensor\[(.*?)\]/);
  if (!match) return null;

  // Split the content to get the shape part (before the first '|')
  const parts = match[1].split('|');
  const shapeStr = parts[0];

  // Split the shape string by 'x' and convert to integers
  return shapeStr.split('x').map(dim => parseInt(dim, 10));
}
";

/// Leaves the TUI, runs `$EDITOR` on `path`, and restores the TUI.
fn with_editor<B: Backend>(terminal: &mut Terminal<B>, path: &Path) -> Result<()> {
    disable_raw_mode().ok();
    let mut stdout = std::io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = Command::new(&editor).arg(path).status();

    execute!(stdout, EnterAlternateScreen).ok();
    enable_raw_mode().ok();
    terminal.clear()?;

    match status {
        Ok(s) if !s.success() => {
            tracing::warn!(%editor, status = %s, "editor exited with failure");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(err) => Err(err).with_context(|| format!("launching editor {editor:?}")),
    }
}

fn temp_path(stem: &str, ext: &str) -> std::path::PathBuf {
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    env::temp_dir().join(format!("tracetui-{sanitized}-{}.{ext}", std::process::id()))
}

/// Opens the event as pretty JSON for reading.
pub fn open_event_in_editor<B: Backend>(terminal: &mut Terminal<B>, event: &Event) -> Result<()> {
    let path = temp_path("event", "json");
    let contents = serde_json::to_string_pretty(event)?;
    fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    let result = with_editor(terminal, &path);
    fs::remove_file(&path).ok();
    result
}

/// Edits parser source; `None` when the buffer came back unchanged or empty.
pub fn edit_parser_source<B: Backend>(
    terminal: &mut Terminal<B>,
    name: &str,
    initial: &str,
) -> Result<Option<String>> {
    let path = temp_path(if name.is_empty() { "parser" } else { name }, "js");
    fs::write(&path, initial).with_context(|| format!("writing {}", path.display()))?;
    let result = with_editor(terminal, &path)
        .and_then(|()| fs::read_to_string(&path).with_context(|| format!("reading {}", path.display())));
    fs::remove_file(&path).ok();
    let edited = result?;
    if edited.trim().is_empty() || (edited.trim() == initial.trim() && !name.is_empty()) {
        return Ok(None);
    }
    Ok(Some(edited))
}
