use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Directory name used under XDG/platform-native roots for all podliner files.
const PRODUCT: &str = "podliner";

/// Global flag to control whether to use system-installed binaries from PATH
/// instead of bundled ones in an `external/` folder beside the executable.
/// Defaults to false (prefer bundled/external binaries).
static USE_SYSTEM_DEPS: AtomicBool = AtomicBool::new(false);

/// Set whether to use system dependencies (from PATH) instead of bundled ones.
pub fn set_use_system_deps(use_system: bool) {
    USE_SYSTEM_DEPS.store(use_system, Ordering::Relaxed);
}

/// Check whether to use system dependencies from PATH.
pub fn should_use_system_deps() -> bool {
    USE_SYSTEM_DEPS.load(Ordering::Relaxed)
}

/// `PODLINER_DATA_DIR` overrides the computed data directory; used by test
/// harnesses and portable installs that want everything beside the exe.
fn data_dir_override() -> Option<PathBuf> {
    std::env::var_os("PODLINER_DATA_DIR").map(PathBuf::from)
}

pub fn data_dir() -> PathBuf {
    if let Some(dir) = data_dir_override() {
        return dir;
    }

    // On macOS and Linux, use ~/.local/share/podliner/ (XDG standard)
    // instead of macOS Application Support for consistency.
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(PRODUCT)
    }
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_data = exe_dir.join("data");
                if portable_data.exists() {
                    return portable_data;
                }
            }
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(PRODUCT)
    }
}

pub fn config_dir() -> PathBuf {
    if let Some(dir) = data_dir_override() {
        return dir;
    }

    // On Windows, check for a portable appsettings.json beside the exe first.
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable_config = exe_dir.join("appsettings.json");
                if portable_config.exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
    }

    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join(PRODUCT);
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(PRODUCT)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(PRODUCT)
    }
}

pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

pub fn cache_dir() -> PathBuf {
    if let Some(dir) = data_dir_override() {
        return dir.join("cache");
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(temp_dir)
            .join(".cache")
            .join(PRODUCT)
    }
    #[cfg(windows)]
    {
        dirs::cache_dir().unwrap_or_else(temp_dir).join(PRODUCT)
    }
}

/// Daily rotating log directory. Honours `XDG_STATE_HOME` when set (§6).
pub fn log_dir() -> PathBuf {
    if let Some(state_home) = std::env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(state_home).join(PRODUCT).join("logs");
    }
    data_dir().join("logs")
}

/// Default directory downloaded episode audio is written under.
pub fn downloads_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                let portable = exe_dir.join("downloads");
                if portable.exists() {
                    return portable;
                }
            }
        }
    }

    dirs::audio_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join("Podcasts")
}

pub fn app_settings_path() -> PathBuf {
    config_dir().join("appsettings.json")
}

pub fn library_path() -> PathBuf {
    data_dir().join("library.json")
}

pub fn gpodder_config_path() -> PathBuf {
    config_dir().join("gpodder.json")
}

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/podliner-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "podliner-mpv".to_string()
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

#[cfg(unix)]
fn vlc_binary_names() -> &'static [&'static str] {
    &["cvlc", "vlc"]
}

#[cfg(windows)]
fn vlc_binary_names() -> &'static [&'static str] {
    &["vlc.exe"]
}

#[cfg(unix)]
fn ffplay_binary_names() -> &'static [&'static str] {
    &["ffplay"]
}

#[cfg(windows)]
fn ffplay_binary_names() -> &'static [&'static str] {
    &["ffplay.exe", "ffplay"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    for name in names {
        let p = dir.join(name);
        if p.exists() {
            return Some(p);
        }
        let p = dir.join("external").join(name);
        if p.exists() {
            return Some(p);
        }
    }
    None
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find the mpv binary for IPC-driven playback.
/// Checks: `MPV_PATH` env var, beside the current exe (unless using system
/// deps), then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("MPV_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let names = &[mpv_binary_name()];
    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(names) {
            return Some(p);
        }
    }
    find_on_path(names)
}

/// Find a VLC (or cvlc) binary for playback.
pub fn find_vlc_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("VLC_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(vlc_binary_names()) {
            return Some(p);
        }
    }
    find_on_path(vlc_binary_names())
}

/// Find the ffplay binary used as a last-resort fallback engine.
pub fn find_ffplay_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FFPLAY_PATH") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    if !should_use_system_deps() {
        if let Some(p) = find_beside_exe(ffplay_binary_names()) {
            return Some(p);
        }
    }
    find_on_path(ffplay_binary_names())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_override_wins() {
        std::env::set_var("PODLINER_DATA_DIR", "/tmp/podliner-test-override");
        assert_eq!(data_dir(), PathBuf::from("/tmp/podliner-test-override"));
        assert_eq!(
            library_path(),
            PathBuf::from("/tmp/podliner-test-override/library.json")
        );
        std::env::remove_var("PODLINER_DATA_DIR");
    }

    #[test]
    fn config_and_data_dirs_differ() {
        std::env::remove_var("PODLINER_DATA_DIR");
        std::env::remove_var("XDG_CONFIG_HOME");
        assert_ne!(config_dir(), data_dir());
    }

    #[test]
    fn mpv_socket_arg_embeds_socket_name() {
        assert!(mpv_socket_arg().contains(&mpv_socket_name()));
    }
}
