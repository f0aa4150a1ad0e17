use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::warn;

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let root = base.join("event-calendar");
    if let Err(err) = fs::create_dir_all(&root) {
        warn!("failed to create data root {:?}: {err}", root);
    }
    root
});

fn data_root() -> &'static Path {
    DATA_ROOT.as_path()
}

pub fn database_path() -> PathBuf {
    data_root().join("custom-events.sqlite")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            warn!("failed to create parent {:?}: {err}", parent);
        }
    }
}
