use std::env;
use std::path::PathBuf;

const APP_DIR: &str = "coqsync";

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Return the user's home directory.
///
/// Uses HOME on Unix-like systems and USERPROFILE on Windows.
pub fn get_home_dir() -> Option<PathBuf> {
    non_empty_var("HOME")
        .or_else(|| non_empty_var("USERPROFILE"))
        .map(PathBuf::from)
}

/// Directory holding the config file: `$XDG_CONFIG_HOME/coqsync`, falling
/// back to `~/.config/coqsync`.
pub fn config_dir() -> Option<PathBuf> {
    non_empty_var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| get_home_dir().map(|home| home.join(".config")))
        .map(|base| base.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap();
        let previous: Vec<_> = vars
            .iter()
            .map(|(name, _)| (name.to_string(), env::var(name).ok()))
            .collect();

        for (name, value) in vars {
            match value {
                Some(v) => env::set_var(name, v),
                None => env::remove_var(name),
            }
        }

        f();

        for (name, value) in previous {
            match value {
                Some(v) => env::set_var(&name, v),
                None => env::remove_var(&name),
            }
        }
    }

    #[test]
    fn home_prefers_home() {
        with_env(
            &[("HOME", Some("/tmp/home")), ("USERPROFILE", Some("/tmp/profile"))],
            || assert_eq!(get_home_dir(), Some(PathBuf::from("/tmp/home"))),
        );
    }

    #[test]
    fn home_falls_back_to_userprofile() {
        with_env(&[("HOME", Some("")), ("USERPROFILE", Some("/tmp/profile"))], || {
            assert_eq!(get_home_dir(), Some(PathBuf::from("/tmp/profile")))
        });
    }

    #[test]
    fn config_dir_uses_xdg_when_set() {
        with_env(
            &[("XDG_CONFIG_HOME", Some("/tmp/xdg")), ("HOME", Some("/tmp/home"))],
            || assert_eq!(config_dir(), Some(PathBuf::from("/tmp/xdg/coqsync"))),
        );
    }

    #[test]
    fn config_dir_defaults_under_home() {
        with_env(&[("XDG_CONFIG_HOME", None), ("HOME", Some("/tmp/home"))], || {
            assert_eq!(config_dir(), Some(PathBuf::from("/tmp/home/.config/coqsync")))
        });
    }
}
