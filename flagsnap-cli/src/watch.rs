use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use flagsnap_lib::{FeatureRegistry, Registry};
use notify::{EventKind, RecursiveMode, Watcher};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Check whether a notify event touches the watched snapshot file.
fn event_affects(event: &notify::Event, file_name: &str) -> bool {
    event.paths.iter().any(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n == file_name)
    })
}

/// Reads and installs the snapshot at `path`. A rejected payload leaves the
/// previous snapshot active.
pub fn reload(
    registry: &Registry,
    features: &FeatureRegistry,
    path: &Path,
) -> Result<usize, String> {
    let bytes =
        std::fs::read(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    registry
        .load_bytes(&bytes, features)
        .map_err(|e| format!("rejected {}: {}", path.display(), e))?;
    Ok(registry.snapshot().len())
}

pub async fn watch_snapshot(features: FeatureRegistry, path: PathBuf) -> Result<(), ()> {
    let registry = Registry::new();
    match reload(&registry, &features, &path) {
        Ok(count) => println!("Loaded {} flags from {}", count, path.display()),
        Err(e) => {
            eprintln!("{}", e);
            return Err(());
        }
    }

    let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
        eprintln!("{} is not a file path", path.display());
        return Err(());
    };

    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    let mut watcher = match notify::recommended_watcher(move |res: Result<notify::Event, _>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event_affects(&event, &file_name)
            {
                let _ = tx.try_send(());
            }
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Failed to create file watcher: {}", e);
            return Err(());
        }
    };

    let watch_path = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    if let Err(e) = watcher.watch(&watch_path, RecursiveMode::NonRecursive) {
        eprintln!("Failed to watch {}: {}", watch_path.display(), e);
        return Err(());
    }

    println!("Watching {} for changes (Ctrl-C to stop)", path.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = rx.recv() => {
                if received.is_none() {
                    break;
                }
            }
        }

        // Debounce: wait a bit and drain any extra events
        tokio::time::sleep(DEBOUNCE).await;
        while rx.try_recv().is_ok() {}

        let now = Local::now().format("%H:%M:%S");
        match reload(&registry, &features, &path) {
            Ok(count) => println!("[{}] reloaded {} flags", now, count),
            Err(e) => {
                tracing::warn!(path = %path.display(), "reload rejected, keeping previous snapshot");
                eprintln!("[{}] {}, keeping previous snapshot", now, e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use flagsnap_lib::{DeclaredType, FeatureId};

    use super::*;

    fn features() -> FeatureRegistry {
        let id: FeatureId = "feature::global::darkMode".parse().unwrap();
        FeatureRegistry::new().with(id, DeclaredType::Boolean).unwrap()
    }

    const GOOD: &str = r#"{"flags": [{
        "key": "feature::global::darkMode",
        "defaultValue": {"type": "BOOLEAN", "value": true},
        "salt": "v1",
        "isActive": true,
        "rules": []
    }]}"#;

    #[test]
    fn test_reload_keeps_last_good_snapshot() {
        let dir = std::env::temp_dir().join(format!("fsnap-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("flags.json");
        let registry = Registry::new();

        std::fs::write(&path, GOOD).unwrap();
        assert_eq!(reload(&registry, &features(), &path), Ok(1));
        let good = registry.snapshot();

        std::fs::write(&path, "{ not json").unwrap();
        assert!(reload(&registry, &features(), &path).is_err());
        assert!(std::sync::Arc::ptr_eq(&good, &registry.snapshot()));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_event_filter() {
        let event =
            notify::Event::new(EventKind::Any).add_path(PathBuf::from("/tmp/x/flags.json"));
        assert!(event_affects(&event, "flags.json"));
        assert!(!event_affects(&event, "other.json"));
    }
}
