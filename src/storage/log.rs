//! Food log persisted as a JSON array
//!
//! Every write lands in `<file>.tmp` and is renamed over the log, so readers
//! never observe a half-written file. One async mutex serializes the
//! read-modify-write cycles of the pipeline and the API.

use chrono::{Local, NaiveDateTime, SubsecRound};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::ai::vision::UNKNOWN_FOOD;
use crate::error::Result;

/// One logged item.
///
/// Logs written by the first prototype only carry `image_path`, `item` and
/// `weight`; such entries read back undated and get an id on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(alias = "item")]
    pub food_type: String,
    #[serde(alias = "weight")]
    pub weight_grams: f64,
    #[serde(default)]
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// What a caller supplies; id and timestamp are assigned by the log
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub food_type: String,
    pub weight_grams: f64,
    pub image_path: String,
    pub confidence: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// The slice of an entry the recipe prompts care about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Ingredient {
    pub food_type: String,
    pub weight_grams: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Newest,
    Oldest,
}

#[derive(Debug)]
pub struct FoodLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FoodLog {
    /// Open (creating if needed) the log at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let log = Self {
            path,
            lock: Mutex::new(()),
        };

        if !tokio::fs::try_exists(&log.path).await? {
            log.write(&[]).await?;
            tracing::info!("Created empty food log at {:?}", log.path);
        }

        Ok(log)
    }

    async fn read(&self) -> Result<Vec<LogEntry>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Vec<LogEntry>>(&contents) {
            Ok(mut entries) => {
                for (index, entry) in entries.iter_mut().enumerate() {
                    if entry.id.is_empty() {
                        entry.id = format!("legacy_{}", index);
                    }
                }
                Ok(entries)
            }
            Err(e) => {
                let aside = sibling(&self.path, ".corrupt");
                tracing::warn!(
                    "Food log at {:?} is not a valid entry list ({}); moving it to {:?} and starting empty",
                    self.path,
                    e,
                    aside
                );
                tokio::fs::rename(&self.path, &aside).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn write(&self, entries: &[LogEntry]) -> Result<()> {
        let tmp = sibling(&self.path, ".tmp");

        let json = serde_json::to_vec_pretty(entries)?;
        let result = async {
            tokio::fs::write(&tmp, &json).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = result {
            tracing::error!("Error writing food log: {}", e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Append an entry and return it as stored
    pub async fn add_entry(&self, new: NewEntry) -> Result<LogEntry> {
        let entry = LogEntry {
            id: generate_id(),
            timestamp: Some(Local::now().naive_local().trunc_subsecs(6)),
            food_type: new.food_type,
            weight_grams: new.weight_grams,
            image_path: new.image_path,
            confidence: new.confidence,
            metadata: new.metadata,
        };

        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        entries.push(entry.clone());
        self.write(&entries).await?;

        tracing::debug!(id = %entry.id, food = %entry.food_type, "Logged entry");
        Ok(entry)
    }

    /// Entries sorted by timestamp, optionally truncated
    pub async fn entries(&self, limit: Option<usize>, order: Order) -> Result<Vec<LogEntry>> {
        let mut entries = {
            let _guard = self.lock.lock().await;
            self.read().await?
        };

        // Undated entries sort oldest. Stable sort keeps file order for equal
        // timestamps; reversing puts the latest append first
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if order == Order::Newest {
            entries.reverse();
        }
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    pub async fn entry(&self, id: &str) -> Result<Option<LogEntry>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.into_iter().find(|e| e.id == id))
    }

    /// Remove an entry; false when no entry has that id
    pub async fn delete_entry(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read().await?;
        let Some(index) = entries.iter().position(|e| e.id == id) else {
            return Ok(false);
        };

        let removed = entries.remove(index);
        self.write(&entries).await?;
        tracing::info!(id = %removed.id, food = %removed.food_type, "Deleted log entry");
        Ok(true)
    }

    /// Logged items in capture order, skipping ones that were never identified by name
    pub async fn ingredients(&self) -> Result<Vec<Ingredient>> {
        Ok(self
            .entries(None, Order::Oldest)
            .await?
            .into_iter()
            .filter(|e| {
                let name = e.food_type.trim();
                !name.is_empty() && !name.eq_ignore_ascii_case(UNKNOWN_FOOD)
            })
            .map(|e| Ingredient {
                food_type: e.food_type,
                weight_grams: e.weight_grams,
            })
            .collect())
    }
}

/// `path` with `suffix` appended to the file name
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// `<unix seconds>_<8 hex digits>`
fn generate_id() -> String {
    format!(
        "{}_{:08x}",
        chrono::Utc::now().timestamp(),
        rand::random::<u32>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn apple() -> NewEntry {
        NewEntry {
            food_type: "Apple".to_string(),
            weight_grams: 150.5,
            image_path: "images/image_1.jpg".to_string(),
            confidence: Some(0.95),
            metadata: Some(serde_json::json!({"color": "red"})),
        }
    }

    #[tokio::test]
    async fn test_open_creates_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("food_log.json");

        let log = FoodLog::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
        assert!(log.entries(None, Order::Newest).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_and_get_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = FoodLog::open(dir.path().join("food_log.json")).await.unwrap();

        let entry = log.add_entry(apple()).await.unwrap();
        let (secs, hex) = entry.id.split_once('_').unwrap();
        assert!(secs.parse::<i64>().is_ok());
        assert_eq!(hex.len(), 8);

        let fetched = log.entry(&entry.id).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
        assert!(log.entry("missing").await.unwrap().is_none());

        // No temp file left behind
        assert!(!dir.path().join("food_log.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_optional_fields_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food_log.json");
        let log = FoodLog::open(&path).await.unwrap();

        log.add_entry(NewEntry {
            food_type: "Rice".to_string(),
            weight_grams: 200.0,
            image_path: "images/image_2.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let object = raw[0].as_object().unwrap();
        assert!(object.contains_key("weight_grams"));
        assert!(!object.contains_key("confidence"));
        assert!(!object.contains_key("metadata"));
    }

    #[tokio::test]
    async fn test_entries_order_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food_log.json");
        std::fs::write(
            &path,
            r#"[
              {"id": "a", "timestamp": "2025-01-01T08:00:00", "food_type": "Egg", "weight_grams": 60.0, "image_path": "images/image_1.jpg"},
              {"id": "c", "timestamp": "2025-01-03T08:00:00", "food_type": "Bread", "weight_grams": 80.0, "image_path": "images/image_3.jpg"},
              {"id": "b", "timestamp": "2025-01-02T08:00:00", "food_type": "Milk", "weight_grams": 250.0, "image_path": "images/image_2.jpg"}
            ]"#,
        )
        .unwrap();
        let log = FoodLog::open(&path).await.unwrap();

        let newest: Vec<_> = log
            .entries(None, Order::Newest)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(newest, ["c", "b", "a"]);

        let oldest = log.entries(Some(2), Order::Oldest).await.unwrap();
        assert_eq!(oldest.len(), 2);
        assert_eq!(oldest[0].id, "a");
        assert_eq!(oldest[1].id, "b");
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = FoodLog::open(dir.path().join("food_log.json")).await.unwrap();

        let first = log.add_entry(apple()).await.unwrap();
        let second = log.add_entry(apple()).await.unwrap();

        assert!(log.delete_entry(&first.id).await.unwrap());
        assert!(!log.delete_entry(&first.id).await.unwrap());

        let remaining = log.entries(None, Order::Newest).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
    }

    #[tokio::test]
    async fn test_legacy_item_log_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item_log.json");
        std::fs::write(
            &path,
            r#"[{"image_path": "images/capture1.jpg", "item": "Banana", "weight": 120.3}]"#,
        )
        .unwrap();

        let log = FoodLog::open(&path).await.unwrap();
        let ingredients = log.ingredients().await.unwrap();
        assert_eq!(
            ingredients,
            [Ingredient {
                food_type: "Banana".to_string(),
                weight_grams: 120.3
            }]
        );

        let added = log.add_entry(apple()).await.unwrap();
        let entries = log.entries(None, Order::Oldest).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "legacy_0");
        assert_eq!(entries[0].food_type, "Banana");
        assert!(entries[0].timestamp.is_none());
        assert_eq!(entries[1].id, added.id);

        // The assigned id sticks once the file has been rewritten
        assert!(log.delete_entry("legacy_0").await.unwrap());
        assert_eq!(log.entries(None, Order::Newest).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food_log.json");
        std::fs::write(&path, "{not json").unwrap();

        let log = FoodLog::open(&path).await.unwrap();
        assert!(log.entries(None, Order::Newest).await.unwrap().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("food_log.json.corrupt")).unwrap(),
            "{not json"
        );

        log.add_entry(apple()).await.unwrap();
        assert_eq!(log.entries(None, Order::Newest).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingredients_skip_unnamed() {
        let dir = tempfile::tempdir().unwrap();
        let log = FoodLog::open(dir.path().join("food_log.json")).await.unwrap();

        log.add_entry(apple()).await.unwrap();
        log.add_entry(NewEntry {
            food_type: "  ".to_string(),
            weight_grams: 10.0,
            image_path: "images/image_9.jpg".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let ingredients = log.ingredients().await.unwrap();
        assert_eq!(ingredients.len(), 1);
        assert_eq!(ingredients[0].food_type, "Apple");
    }

    #[tokio::test]
    async fn test_ingredients_skip_failed_identifications() {
        let dir = tempfile::tempdir().unwrap();
        let log = FoodLog::open(dir.path().join("food_log.json")).await.unwrap();

        for name in [UNKNOWN_FOOD, "Unknown"] {
            log.add_entry(NewEntry {
                food_type: name.to_string(),
                weight_grams: 90.0,
                image_path: "images/image_2.jpg".to_string(),
                confidence: Some(0.0),
                metadata: Some(serde_json::json!({"identify_error": "Model error: timeout"})),
            })
            .await
            .unwrap();
        }
        log.add_entry(apple()).await.unwrap();

        let ingredients = log.ingredients().await.unwrap();
        assert_eq!(ingredients.len(), 1);
        assert_eq!(ingredients[0].food_type, "Apple");
        assert_eq!(log.entries(None, Order::Newest).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_timestamps_keep_microseconds() {
        use chrono::Timelike;

        let dir = tempfile::tempdir().unwrap();
        let log = FoodLog::open(dir.path().join("food_log.json")).await.unwrap();

        let entry = log.add_entry(apple()).await.unwrap();
        let timestamp = entry.timestamp.unwrap();
        assert_eq!(timestamp.nanosecond() % 1_000, 0);

        let raw = serde_json::to_value(&entry).unwrap();
        let fraction = raw["timestamp"]
            .as_str()
            .unwrap()
            .split_once('.')
            .map_or(0, |(_, f)| f.len());
        assert!(fraction <= 6);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(FoodLog::open(dir.path().join("food_log.json")).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let log = log.clone();
            handles.push(tokio::spawn(async move { log.add_entry(apple()).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(log.entries(None, Order::Newest).await.unwrap().len(), 20);
    }
}
