//! Plugin name registry (§4.E "Name registry"): resolves the set of plugin
//! basenames to load, either from a plain-text config file (one basename
//! per line) or from a compiled-in default list, and turns each basename
//! into a path resolved relative to the startup plugin's directory.

use std::path::{Path, PathBuf};

/// Compiled-in fallback list, used when no config file is present. Empty
/// by default: this daemon ships no business-logic plugins of its own
/// (§1 "deliberately out of scope"), only the `-p` paths the operator
/// names on the command line plus whatever this list adds.
pub const DEFAULT_PLUGIN_NAMES: &[&str] = &[];

/// Reads one basename per line from `path`, skipping blank lines and
/// lines starting with `#` (a conventional comment marker, not part of
/// the legacy format itself but harmless to support).
pub fn read_config_file(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Resolves a plugin basename to a full path, relative to `base_dir`
/// (typically the directory containing the first `-p` argument) unless
/// the name is already absolute.
pub fn resolve_plugin_path(base_dir: &Path, name: &str) -> PathBuf {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

/// The full list of plugin paths to load at startup: every `-p` path given
/// explicitly on the command line, in order, followed by anything named in
/// `config_file` (if given) or the compiled-in default list otherwise.
pub fn resolve_startup_plugins(cli_paths: &[PathBuf], config_file: Option<&Path>) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = cli_paths.to_vec();

    let base_dir = cli_paths
        .first()
        .and_then(|p| p.parent())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let extra_names: Vec<String> = match config_file {
        Some(path) if path.exists() => read_config_file(path)?,
        _ => DEFAULT_PLUGIN_NAMES.iter().map(|s| s.to_string()).collect(),
    };

    for name in extra_names {
        paths.push(resolve_plugin_path(&base_dir, &name));
    }

    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_skips_blank_and_comment_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modules.conf");
        std::fs::write(&path, "battery\n\n# a comment\nthermal\n").unwrap();
        let names = read_config_file(&path).unwrap();
        assert_eq!(names, vec!["battery".to_string(), "thermal".to_string()]);
    }

    #[test]
    fn relative_name_resolves_against_base_dir() {
        let base = Path::new("/opt/dsme/plugins");
        assert_eq!(resolve_plugin_path(base, "battery.so"), PathBuf::from("/opt/dsme/plugins/battery.so"));
    }

    #[test]
    fn absolute_name_is_left_untouched() {
        let base = Path::new("/opt/dsme/plugins");
        assert_eq!(resolve_plugin_path(base, "/etc/dsme/other.so"), PathBuf::from("/etc/dsme/other.so"));
    }

    #[test]
    fn startup_plugins_combines_cli_paths_and_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("plugins");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        let cli_path = plugin_dir.join("startup.so");
        let config_path = dir.path().join("modules.conf");
        std::fs::write(&config_path, "battery\n").unwrap();

        let paths = resolve_startup_plugins(&[cli_path.clone()], Some(&config_path)).unwrap();
        assert_eq!(paths, vec![cli_path, plugin_dir.join("battery")]);
    }

    #[test]
    fn missing_config_file_falls_back_to_compiled_in_defaults() {
        let paths = resolve_startup_plugins(&[PathBuf::from("/opt/dsme/startup.so")], None).unwrap();
        assert_eq!(paths, vec![PathBuf::from("/opt/dsme/startup.so")]);
    }
}
