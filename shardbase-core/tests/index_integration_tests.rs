// Index engine invariants exercised through the collection facade, plus
// on-disk layout checks.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use shardbase_core::{Database, DatabaseOptions, FindQuery};
use tempfile::TempDir;

type ShardFile = BTreeMap<String, Vec<String>>;

fn create_db(dir: &TempDir) -> Database {
    Database::create(dir.path().join("db"), DatabaseOptions::default()).unwrap()
}

/// Parse every shard file of one index into (file name -> contents).
fn read_shards(collection_dir: &Path, index: &str) -> BTreeMap<String, ShardFile> {
    let mut shards = BTreeMap::new();
    let indices_dir = collection_dir.join("_indices");
    let Ok(entries) = fs::read_dir(&indices_dir) else {
        return shards;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(&format!("{}_shard", index)) {
            continue;
        }
        let contents = fs::read_to_string(entry.path()).unwrap();
        shards.insert(name, serde_json::from_str(&contents).unwrap());
    }
    shards
}

fn occurrences_of(shards: &BTreeMap<String, ShardFile>, doc_id: &str) -> usize {
    shards
        .values()
        .flat_map(|shard| shard.values())
        .filter(|posting| posting.iter().any(|id| id == doc_id))
        .count()
}

#[test]
fn test_document_appears_in_exactly_one_shard_key() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection(
            "users",
            Some(json!({"indices": {"age_role": ["age", "role"]}})),
        )
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..40 {
        let inserted = users
            .insert(json!({"age": i % 7, "role": format!("r{}", i % 4)}))
            .unwrap();
        ids.push(inserted["id"].as_str().unwrap().to_string());
    }

    let shards = read_shards(&db.path().join("users"), "age_role");
    for id in &ids {
        assert_eq!(occurrences_of(&shards, id), 1, "id {} duplicated or lost", id);
    }
}

#[test]
fn test_update_keeps_single_occurrence() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection("users", Some(json!({"indices": {"age": ["age"]}})))
        .unwrap();

    let id = users.insert(json!({"age": 1})).unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    for new_age in [2, 3, 4, 5] {
        users.update(&id, json!({"age": new_age})).unwrap();
        let shards = read_shards(&db.path().join("users"), "age");
        assert_eq!(occurrences_of(&shards, &id), 1);
    }

    // Updating an unindexed field leaves the posting untouched.
    let before = read_shards(&db.path().join("users"), "age");
    users.update(&id, json!({"note": "hello"})).unwrap();
    let after = read_shards(&db.path().join("users"), "age");
    assert_eq!(before, after);
}

#[test]
fn test_no_empty_postings_on_disk() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection("users", Some(json!({"indices": {"age": ["age"]}})))
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..10 {
        ids.push(
            users.insert(json!({"age": i})).unwrap()["id"]
                .as_str()
                .unwrap()
                .to_string(),
        );
    }
    for id in &ids {
        users.delete(id).unwrap();
    }

    let shards = read_shards(&db.path().join("users"), "age");
    for shard in shards.values() {
        for (key, posting) in shard {
            assert!(!posting.is_empty(), "empty posting left behind for {}", key);
        }
        assert!(shard.is_empty(), "keys should be gone after all deletes");
    }
}

#[test]
fn test_prefix_equals_union_of_exact_lookups() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection(
            "users",
            Some(json!({"indices": {"age_role": ["age", "role"]}})),
        )
        .unwrap();

    for role in ["a", "b", "c"] {
        for copy in 0..3 {
            users
                .insert(json!({"age": 29, "role": role, "copy": copy}))
                .unwrap();
        }
    }
    users.insert(json!({"age": 30, "role": "a"})).unwrap();

    let prefix = users
        .find(FindQuery::new().with_where(json!({"age": 29})))
        .unwrap();

    let mut union_ids: Vec<String> = Vec::new();
    for role in ["a", "b", "c"] {
        let exact = users
            .find(FindQuery::new().with_where(json!({
                "$and": [{"age": 29}, {"role": role}]
            })))
            .unwrap();
        for doc in &exact.results {
            union_ids.push(doc["id"].as_str().unwrap().to_string());
        }
    }

    let mut prefix_ids: Vec<String> = prefix
        .results
        .iter()
        .map(|doc| doc["id"].as_str().unwrap().to_string())
        .collect();
    prefix_ids.sort();
    union_ids.sort();
    union_ids.dedup();
    assert_eq!(prefix_ids, union_ids);
    assert_eq!(prefix.size, 9);
}

#[test]
fn test_shard_files_are_valid_json_after_every_write() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection("users", Some(json!({"indices": {"n": ["n"]}})))
        .unwrap();

    for i in 0..15 {
        users.insert(json!({"n": i})).unwrap();
        for (name, _) in read_shards(&db.path().join("users"), "n") {
            // read_shards unwraps the JSON parse; reaching here means the
            // file was complete.
            assert!(name.ends_with(".json"));
        }
    }

    // No temp files left behind.
    let indices_dir = db.path().join("users").join("_indices");
    for entry in fs::read_dir(indices_dir).unwrap().flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        assert!(!name.ends_with(".tmp"), "stray temp file {}", name);
    }
}

#[test]
fn test_corrupt_shard_degrades_to_empty_then_recovers_by_rebuild() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection("users", Some(json!({"indices": {"age": ["age"]}})))
        .unwrap();

    for i in 0..8 {
        users.insert(json!({"age": i, "name": format!("u{}", i)})).unwrap();
    }

    // Corrupt every shard file of the index.
    let indices_dir = db.path().join("users").join("_indices");
    for entry in fs::read_dir(&indices_dir).unwrap().flatten() {
        fs::write(entry.path(), "{definitely not json").unwrap();
    }
    // Evict resident shards so the corruption is actually read.
    users.close();

    let health = users.check_indices_health();
    assert_eq!(health.corrupted, vec!["age"]);

    // Queries degrade (index reads as empty) rather than fail.
    let result = users
        .find(FindQuery::new().with_where(json!({"age": 3})))
        .unwrap();
    assert_eq!(result.size, 0);

    users.rebuild_all_indices().unwrap();
    let health = users.check_indices_health();
    assert!(health.corrupted.is_empty());
    let result = users
        .find(FindQuery::new().with_where(json!({"age": 3})))
        .unwrap();
    assert_eq!(result.size, 1);
    assert_eq!(result.results[0]["name"], "u3");
}

#[test]
fn test_document_layout_two_level_sharding() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db.collection("users", Some(json!({}))).unwrap();

    for i in 0..20 {
        users.insert(json!({"n": i})).unwrap();
    }

    // Every document file sits at users/HHH/SSS/<id>.json with numeric,
    // zero-padded directory names.
    let mut found = 0;
    for primary in fs::read_dir(db.path().join("users")).unwrap().flatten() {
        let primary_name = primary.file_name().to_string_lossy().to_string();
        if primary_name.starts_with('_') {
            continue;
        }
        assert_eq!(primary_name.len(), 3);
        assert!(primary_name.parse::<u32>().unwrap() < 256);

        for sub in fs::read_dir(primary.path()).unwrap().flatten() {
            let sub_name = sub.file_name().to_string_lossy().to_string();
            assert_eq!(sub_name.len(), 3);
            assert!(sub_name.parse::<u32>().unwrap() < 16);

            for file in fs::read_dir(sub.path()).unwrap().flatten() {
                let file_name = file.file_name().to_string_lossy().to_string();
                assert!(file_name.ends_with(".json"));
                let parsed: Value =
                    serde_json::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
                assert!(parsed["id"].is_string());
                found += 1;
            }
        }
    }
    assert_eq!(found, 20);
}

#[test]
fn test_lazy_attach_rebuild_recreates_missing_shards() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("db");
    {
        let db = Database::create(&db_path, DatabaseOptions::default()).unwrap();
        let users = db
            .collection("users", Some(json!({"indices": {"age": ["age"]}})))
            .unwrap();
        for i in 0..5 {
            users.insert(json!({"age": i})).unwrap();
        }
        // Simulate a declared index whose files were lost.
        fs::remove_dir_all(db_path.join("users").join("_indices")).unwrap();
    }

    let options = DatabaseOptions {
        skip_initial_index_build: true,
        ..DatabaseOptions::default()
    };
    let db = Database::open(&db_path, options).unwrap();
    let users = db.collection("users", None).unwrap();

    // Attached without a rebuild: the index reads as empty but is reported
    // missing, and a rebuild restores it.
    let health = users.check_indices_health();
    assert_eq!(health.missing, vec!["age"]);

    users.rebuild_all_indices().unwrap();
    let health = users.check_indices_health();
    assert_eq!(health.present, vec!["age"]);
    let result = users
        .find(FindQuery::new().with_where(json!({"age": 2})))
        .unwrap();
    assert_eq!(result.size, 1);
}

#[test]
fn test_lazy_build_triggers_on_first_write() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("db");
    {
        let db = Database::create(&db_path, DatabaseOptions::default()).unwrap();
        let users = db
            .collection("users", Some(json!({"indices": {"age": ["age"]}})))
            .unwrap();
        for i in 0..5 {
            users.insert(json!({"age": i, "name": format!("old{}", i)})).unwrap();
        }
        fs::remove_dir_all(db_path.join("users").join("_indices")).unwrap();
    }

    let options = DatabaseOptions {
        skip_initial_index_build: true,
        ..DatabaseOptions::default()
    };
    let db = Database::open(&db_path, options).unwrap();
    let users = db.collection("users", None).unwrap();

    // The first write rebuilds the whole index, old documents included.
    users.insert(json!({"age": 99, "name": "new"})).unwrap();

    let result = users
        .find(FindQuery::new().with_where(json!({"age": 3})))
        .unwrap();
    assert_eq!(result.size, 1);
    assert_eq!(result.results[0]["name"], "old3");

    let result = users
        .find(FindQuery::new().with_where(json!({"age": 99})))
        .unwrap();
    assert_eq!(result.size, 1);
}

#[test]
fn test_dropped_collection_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    let db = create_db(&dir);
    let users = db
        .collection("users", Some(json!({"indices": {"age": ["age"]}})))
        .unwrap();
    users.insert(json!({"age": 1})).unwrap();

    db.drop_collection("users").unwrap();
    assert!(!db.path().join("users").exists());

    // Metadata no longer lists it; reopening agrees.
    let reopened = Database::open(db.path(), DatabaseOptions::default()).unwrap();
    assert!(reopened.list_collections().is_empty());
}
