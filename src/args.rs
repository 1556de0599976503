use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive TUI viewer for execution trace files")]
pub struct Args {
    /// Trace files (JSON) to open; reads stdin when none are given
    pub files: Vec<PathBuf>,

    /// Start in consolidated mode, merging every file into one table
    #[arg(short, long)]
    pub consolidated: bool,

    /// JSON file holding saved parsers (kept in memory only when unset)
    #[arg(long, env = "TRACETUI_PARSERS")]
    pub parsers: Option<PathBuf>,

    /// Directory CSV exports are written to
    #[arg(long, default_value = ".")]
    pub export_dir: PathBuf,

    /// Write logs to this file (logging is off otherwise)
    #[arg(long, env = "TRACETUI_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `tracetui=trace`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_files_and_flags() {
        let args = Args::try_parse_from([
            "tracetui",
            "--consolidated",
            "--export-dir",
            "/tmp/out",
            "a.json",
            "b.json",
        ])
        .unwrap();
        assert!(args.consolidated);
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.export_dir, PathBuf::from("/tmp/out"));
    }
}
