use std::path::PathBuf;

/// Locates a configuration file on disk without reading or parsing it.
///
/// Search order, first existing file wins: `$XDG_CONFIG_HOME/eml/config`,
/// `$HOME/.config/eml/config`, `/etc/eml/config`. An `$XDG_CONFIG_HOME` set
/// to the empty string is treated as unset, matching `emlConfigFind`'s
/// behavior. Returns `None` if no candidate exists; the caller (not this
/// crate, per the Non-goal on config-file parsing) decides how to read and
/// interpret whatever it finds.
pub fn discover_path() -> Option<PathBuf> {
    candidates().into_iter().find(|p| p.is_file())
}

fn candidates() -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(3);

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            out.push(PathBuf::from(xdg).join("eml/config"));
        }
    }
    if let Some(home) = std::env::var_os("HOME") {
        if !home.is_empty() {
            out.push(PathBuf::from(home).join(".config/eml/config"));
        }
    }
    out.push(PathBuf::from("/etc/eml/config"));

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_xdg_config_home_is_treated_as_unset() {
        std::env::set_var("XDG_CONFIG_HOME", "");
        std::env::set_var("HOME", "/nonexistent-home-for-test");
        let cands = candidates();
        assert!(!cands.iter().any(|p| p.starts_with("/.config") || p == std::path::Path::new("eml/config")));
        assert!(cands.last().unwrap().ends_with("etc/eml/config") || cands.last().unwrap() == std::path::Path::new("/etc/eml/config"));
        std::env::remove_var("XDG_CONFIG_HOME");
        std::env::remove_var("HOME");
    }

    #[test]
    fn falls_back_to_etc_when_nothing_else_found() {
        let path = discover_path();
        // We can't assert presence/absence on an arbitrary test host, only
        // that the function doesn't panic and returns a plausible path when
        // it does find one.
        if let Some(p) = path {
            assert!(p.ends_with("config"));
        }
    }
}
