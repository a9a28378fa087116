//! Bounded response cache for tutor replies.
//!
//! Keys are the MD5 of the language plus the normalized last message, so the
//! same question gets the same answer regardless of which provider produced it.
//! Entries expire after their TTL or once they are older than the staleness
//! bound, and the least recently used entry is evicted when the cache is full.
//!
//! Methods take `now` explicitly (`*_at`) so expiry can be tested without sleeping.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::config::CacheConfig;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
  Conversation,
  Translation,
  Explanation,
  SimpleQa,
}

impl CacheType {
  pub fn as_str(&self) -> &'static str {
    match self {
      CacheType::Conversation => "conversation",
      CacheType::Translation => "translation",
      CacheType::Explanation => "explanation",
      CacheType::SimpleQa => "simple_qa",
    }
  }
}

const PATTERNS: &[(CacheType, &[&str])] = &[
  (
    CacheType::Conversation,
    &[
      "hello", "hi", "how are you", "goodbye", "bye", "thanks", "thank you", "good morning",
      "good evening", "nice to meet you", "see you later",
    ],
  ),
  (CacheType::Translation, &["translate", "what does", "mean in", "how do you say"]),
  (CacheType::Explanation, &["what is", "explain", "define", "meaning of", "tell me about"]),
  (CacheType::SimpleQa, &["help me", "can you", "how to", "why", "when", "where"]),
];

const MIN_CONTENT_LEN: usize = 20;
const MAX_CONTENT_LEN: usize = 1000;
const KEY_MESSAGE_CHARS: usize = 200;

/// First pattern group whose needle occurs in the lowercased message.
pub fn classify(message: &str) -> Option<CacheType> {
  let lower = message.to_lowercase();
  PATTERNS
    .iter()
    .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
    .map(|(t, _)| *t)
}

pub fn cache_key(messages: &[&str], language: &str) -> String {
  let last: String = messages
    .last()
    .map(|m| m.trim().to_lowercase())
    .unwrap_or_default()
    .chars()
    .take(KEY_MESSAGE_CHARS)
    .collect();
  let payload = json!({
    "language": language,
    "message": last,
    "message_count": messages.len(),
  });
  format!("{:x}", md5::compute(payload.to_string().as_bytes()))
}

#[derive(Clone, Debug)]
struct CacheEntry {
  content: String,
  provider: String,
  cache_type: CacheType,
  created_at: Instant,
  expires_at: Instant,
  hit_count: u64,
}

/// What a hit hands back to the caller.
#[derive(Clone, Debug)]
pub struct CachedReply {
  pub content: String,
  pub provider: String,
  pub cache_type: CacheType,
  pub hit_count: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
  pub entries: usize,
  pub max_entries: usize,
  pub hit_rate: f64,
  pub hits: u64,
  pub misses: u64,
  pub evictions: u64,
  pub total_requests: u64,
  pub total_size_bytes: usize,
  pub average_entry_size: f64,
  pub type_distribution: BTreeMap<String, usize>,
}

pub struct ResponseCache {
  entries: LruCache<String, CacheEntry>,
  max_entries: usize,
  default_ttl: Duration,
  max_age: Duration,
  hits: u64,
  misses: u64,
  evictions: u64,
  total_requests: u64,
}

impl ResponseCache {
  pub fn new(cfg: &CacheConfig) -> Self {
    let max_entries = cfg.max_entries.max(1);
    let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
    Self {
      entries: LruCache::new(capacity),
      max_entries,
      default_ttl: Duration::from_secs(cfg.default_ttl_hours * 3600),
      max_age: Duration::from_secs(cfg.stale_after_hours * 3600),
      hits: 0,
      misses: 0,
      evictions: 0,
      total_requests: 0,
    }
  }

  pub fn get(&mut self, messages: &[&str], language: &str) -> Option<CachedReply> {
    self.get_at(messages, language, Instant::now())
  }

  pub fn get_at(&mut self, messages: &[&str], language: &str, now: Instant) -> Option<CachedReply> {
    self.total_requests += 1;
    let key = cache_key(messages, language);

    let dead = match self.entries.peek(&key) {
      None => {
        self.misses += 1;
        return None;
      }
      Some(e) => now >= e.expires_at || now.duration_since(e.created_at) > self.max_age,
    };
    if dead {
      self.entries.pop(&key);
      self.misses += 1;
      debug!(target: "cache", %key, "Dropped expired entry");
      return None;
    }

    let entry = self.entries.get_mut(&key)?;
    entry.hit_count += 1;
    self.hits += 1;
    Some(CachedReply {
      content: entry.content.clone(),
      provider: entry.provider.clone(),
      cache_type: entry.cache_type,
      hit_count: entry.hit_count,
    })
  }

  /// Returns whether the reply was stored.
  pub fn set(&mut self, messages: &[&str], language: &str, content: &str, provider: &str, ttl: Option<Duration>) -> bool {
    self.set_at(messages, language, content, provider, ttl, Instant::now())
  }

  pub fn set_at(
    &mut self,
    messages: &[&str],
    language: &str,
    content: &str,
    provider: &str,
    ttl: Option<Duration>,
    now: Instant,
  ) -> bool {
    let Some(last) = messages.last() else { return false };
    let len = content.chars().count();
    if !(MIN_CONTENT_LEN..=MAX_CONTENT_LEN).contains(&len) {
      return false;
    }
    let Some(cache_type) = classify(last) else { return false };

    let key = cache_key(messages, language);
    let entry = CacheEntry {
      content: content.to_string(),
      provider: provider.to_string(),
      cache_type,
      created_at: now,
      expires_at: now + ttl.unwrap_or(self.default_ttl),
      hit_count: 0,
    };
    if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
      if evicted != key {
        self.evictions += 1;
        debug!(target: "cache", %evicted, "Evicted least recently used entry");
      }
    }
    true
  }

  /// Returns the number of removed entries.
  pub fn clear_expired(&mut self) -> usize {
    self.clear_expired_at(Instant::now())
  }

  pub fn clear_expired_at(&mut self, now: Instant) -> usize {
    let dead: Vec<String> = self
      .entries
      .iter()
      .filter(|(_, e)| now >= e.expires_at || now.duration_since(e.created_at) > self.max_age)
      .map(|(k, _)| k.clone())
      .collect();
    for k in &dead {
      self.entries.pop(k);
    }
    dead.len()
  }

  /// Drops every entry and resets counters. Returns the number of removed entries.
  pub fn clear(&mut self) -> usize {
    let n = self.entries.len();
    self.entries.clear();
    self.hits = 0;
    self.misses = 0;
    self.evictions = 0;
    self.total_requests = 0;
    n
  }

  pub fn stats(&self) -> CacheStats {
    let mut type_distribution = BTreeMap::new();
    let mut total_size_bytes = 0usize;
    for (_, e) in self.entries.iter() {
      *type_distribution.entry(e.cache_type.as_str().to_string()).or_insert(0) += 1;
      total_size_bytes += e.content.len();
    }
    let entries = self.entries.len();
    let hit_rate = if self.total_requests > 0 {
      (self.hits as f64 / self.total_requests as f64 * 10000.0).round() / 100.0
    } else {
      0.0
    };
    CacheStats {
      entries,
      max_entries: self.max_entries,
      hit_rate,
      hits: self.hits,
      misses: self.misses,
      evictions: self.evictions,
      total_requests: self.total_requests,
      total_size_bytes,
      average_entry_size: if entries > 0 { total_size_bytes as f64 / entries as f64 } else { 0.0 },
      type_distribution,
    }
  }
}
