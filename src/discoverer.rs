//! Glob-based discovery of dynamic server instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DynamicServerConfig;
use crate::event::{ChannelId, Event};
use crate::hub::Hub;
use crate::tailer::{self, TailerHandle};
use crate::unstacker;

/// Runs forever, rescanning `cfg.log_file_pattern` at `scan_interval` and
/// reconciling the set of live tailers against what it finds.
pub async fn run(
    cfg: DynamicServerConfig,
    hub: Arc<Hub>,
    event_tx: mpsc::Sender<Event>,
    scan_interval: Duration,
    delay_before_rewatch: Duration,
) {
    let mut instances: HashMap<String, TailerHandle> = HashMap::new();

    loop {
        let start = Instant::now();
        let observed = discover_instances(&cfg);

        // An ended tailer is dropped unconditionally, even if its path is
        // still observed this scan — a fatal I/O error can end a tailer
        // whose file never disappeared, and it must be re-spawned below.
        let ended: Vec<String> = instances
            .iter()
            .filter(|(_, handle)| handle.ended.load(Ordering::SeqCst))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ended {
            instances.remove(&id);
        }

        for (id, path) in observed {
            if instances.contains_key(&id) {
                continue;
            }

            let restarted = hub.ensure_dynamic_instance(&cfg.server_tag, &id).await;
            let channel = ChannelId::Dynamic {
                tag: cfg.server_tag.clone(),
                instance: id.clone(),
            };
            if restarted {
                hub.broadcast(&channel, &Event::reset(&channel)).await;
            }

            let (fifo_tx, fifo_rx) = mpsc::unbounded_channel();
            let handle = tailer::spawn(path, fifo_tx, false, delay_before_rewatch);
            tokio::spawn(unstacker::run(channel, fifo_rx, event_tx.clone()));
            instances.insert(id, handle);
        }

        let elapsed = start.elapsed();
        tokio::time::sleep(scan_interval.saturating_sub(elapsed)).await;
    }
}

/// Globs `cfg.log_file_pattern` and extracts an instance id from each match
/// via the named `id` capture group in `cfg.instance_identifier`. Matches
/// with no `id` capture are skipped.
fn discover_instances(cfg: &DynamicServerConfig) -> Vec<(String, PathBuf)> {
    let mut out = Vec::new();
    let paths = match glob::glob(&cfg.log_file_pattern) {
        Ok(paths) => paths,
        Err(e) => {
            debug!(pattern = %cfg.log_file_pattern, error = %e, "discoverer: bad glob pattern");
            return out;
        }
    };

    for entry in paths.flatten() {
        let path_str = entry.to_string_lossy();
        match cfg
            .instance_identifier
            .captures(&path_str)
            .and_then(|caps| caps.name("id"))
        {
            Some(m) => out.push((m.as_str().to_string(), entry.clone())),
            None => debug!(path = %path_str, "discoverer: no instance id match, skipping"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn cfg_for(dir: &std::path::Path) -> DynamicServerConfig {
        DynamicServerConfig {
            server_tag: "lobby".to_string(),
            display_name: "Lobby".to_string(),
            log_file_pattern: dir.join("srv-*/latest.log").to_string_lossy().to_string(),
            instance_identifier: Regex::new(r"srv-(?P<id>\d+)").unwrap(),
            archived_logs_root_dir: None,
            archived_logs_file_pattern: None,
            syntax_highlighting: Vec::new(),
        }
    }

    #[test]
    fn discovers_instances_matching_pattern_and_regex() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("srv-1")).unwrap();
        std::fs::write(dir.path().join("srv-1/latest.log"), b"").unwrap();
        std::fs::create_dir_all(dir.path().join("srv-2")).unwrap();
        std::fs::write(dir.path().join("srv-2/latest.log"), b"").unwrap();

        let cfg = cfg_for(dir.path());
        let mut found = discover_instances(&cfg);
        found.sort();
        assert_eq!(found[0].0, "1");
        assert_eq!(found[1].0, "2");
    }

    #[test]
    fn skips_matches_with_no_id_capture() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("unnamed")).unwrap();
        std::fs::write(dir.path().join("unnamed/latest.log"), b"").unwrap();

        let cfg = cfg_for(dir.path());
        assert!(discover_instances(&cfg).is_empty());
    }
}
