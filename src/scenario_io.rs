//! JSON file mirror of scenario definitions.
//!
//! Persistence failures are logged and never surface to callers; the in-memory
//! store stays authoritative for the running process.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, error, info, instrument};

use crate::domain::ConversationScenario;

/// Write `{id: scenario}` as pretty JSON, creating parent directories.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), count = scenarios.len()))]
pub async fn save_all(path: &Path, scenarios: &HashMap<String, ConversationScenario>) {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      if let Err(e) = tokio::fs::create_dir_all(parent).await {
        error!(target: "scenario", dir = %parent.display(), error = %e, "Failed to create scenarios directory");
        return;
      }
    }
  }
  let ordered: BTreeMap<&String, &ConversationScenario> = scenarios.iter().collect();
  let body = match serde_json::to_string_pretty(&ordered) {
    Ok(b) => b,
    Err(e) => {
      error!(target: "scenario", error = %e, "Failed to serialize scenarios");
      return;
    }
  };
  // readers only ever see a complete file
  let tmp = path.with_extension("json.tmp");
  if let Err(e) = tokio::fs::write(&tmp, body).await {
    error!(target: "scenario", path = %tmp.display(), error = %e, "Failed to write scenarios file");
    return;
  }
  match tokio::fs::rename(&tmp, path).await {
    Ok(()) => debug!(target: "scenario", count = scenarios.len(), "Saved scenarios to file"),
    Err(e) => {
      error!(target: "scenario", path = %path.display(), error = %e, "Failed to replace scenarios file");
      let _ = tokio::fs::remove_file(&tmp).await;
    }
  }
}

/// Missing or unreadable files yield an empty map.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn load_all(path: &Path) -> HashMap<String, ConversationScenario> {
  let raw = match tokio::fs::read_to_string(path).await {
    Ok(s) => s,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      info!(target: "scenario", path = %path.display(), "No saved scenarios file; starting with predefined scenarios only");
      return HashMap::new();
    }
    Err(e) => {
      error!(target: "scenario", path = %path.display(), error = %e, "Failed to read scenarios file");
      return HashMap::new();
    }
  };
  match serde_json::from_str::<HashMap<String, ConversationScenario>>(&raw) {
    Ok(map) => {
      info!(target: "scenario", count = map.len(), "Loaded scenarios from file");
      map
    }
    Err(e) => {
      error!(target: "scenario", path = %path.display(), error = %e, "Failed to parse scenarios file");
      HashMap::new()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::seeds::predefined_scenarios;

  #[tokio::test]
  async fn save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("scenarios.json");
    let map: HashMap<_, _> = predefined_scenarios().into_iter().map(|s| (s.scenario_id.clone(), s)).collect();

    save_all(&path, &map).await;
    let loaded = load_all(&path).await;
    assert_eq!(loaded.len(), 3);
    let hotel = &loaded["hotel_check_in"];
    assert_eq!(hotel.phases.len(), 3);
    assert_eq!(hotel.cultural_context.len(), 3);
  }

  #[tokio::test]
  async fn save_replaces_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenarios.json");
    let mut map: HashMap<_, _> = predefined_scenarios().into_iter().map(|s| (s.scenario_id.clone(), s)).collect();
    save_all(&path, &map).await;

    map.remove("hotel_check_in");
    save_all(&path, &map).await;
    let loaded = load_all(&path).await;
    assert_eq!(loaded.len(), 2);
    assert!(!loaded.contains_key("hotel_check_in"));
    assert!(!path.with_extension("json.tmp").exists());
  }

  #[tokio::test]
  async fn missing_and_corrupt_files_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_all(&dir.path().join("absent.json")).await.is_empty());

    let bad = dir.path().join("bad.json");
    std::fs::write(&bad, "{ not json").unwrap();
    assert!(load_all(&bad).await.is_empty());
  }
}
