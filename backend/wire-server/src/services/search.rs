//! Search index
//!
//! Inverted word index for posts (`word:{token}:{postId}` plus the reverse
//! map `idx:{postId}`) and prefix index for users (`handle-prefix:` /
//! `name-prefix:` → user-id lists), all in the KV tier. Post search is
//! AND-semantics over token lists; user search unions the handle and
//! display-name prefixes.

use crate::coordinators::kv_err;
use crate::keys;
use error_types::{AppError, AppResult};
use kv_store::KvStore;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Tokens indexed per post.
pub const MAX_TOKENS_PER_POST: usize = 50;

/// Terms honored per query.
pub const MAX_QUERY_TERMS: usize = 10;

/// Postings listed per term.
pub const MAX_POSTINGS_PER_TERM: usize = 500;

const MIN_PREFIX_LEN: usize = 3;
const MAX_PREFIX_LEN: usize = 15;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "could", "should", "may", "might", "can", "this",
        "that", "these", "those", "it", "its", "you", "your", "i", "me", "my", "we", "our",
        "they", "them", "their", "he", "him", "his", "she", "her", "not", "no", "so", "if",
        "then", "than", "too", "very", "just", "about",
    ]
    .into_iter()
    .collect()
});

/// Value stored under each `word:` posting.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Posting {
    created_at: i64,
}

#[derive(Clone)]
pub struct SearchIndex {
    kv: Arc<dyn KvStore>,
}

impl SearchIndex {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Lowercase, strip punctuation to spaces, keep words of length ≥2
    /// that are not stopwords plus `@`/`#` tokens, dedupe preserving
    /// order, cap the count.
    pub fn tokenize(content: &str) -> Vec<String> {
        let folded: String = content
            .to_lowercase()
            .chars()
            .map(|ch| {
                if ch.is_alphanumeric() || ch == '_' || ch == '@' || ch == '#' {
                    ch
                } else {
                    ' '
                }
            })
            .collect();

        let mut seen = HashSet::new();
        folded
            .split_whitespace()
            .filter(|token| token.chars().count() >= 2)
            .filter(|token| {
                token.starts_with('@') || token.starts_with('#') || !STOPWORDS.contains(token)
            })
            .map(|token| token.to_string())
            .filter(|token| seen.insert(token.clone()))
            .take(MAX_TOKENS_PER_POST)
            .collect()
    }

    pub async fn index_post(
        &self,
        post_id: &str,
        content: &str,
        created_at_ms: i64,
    ) -> AppResult<()> {
        let tokens = Self::tokenize(content);
        if tokens.is_empty() {
            return Ok(());
        }

        let posting = serde_json::to_string(&Posting {
            created_at: created_at_ms,
        })
        .map_err(|e| AppError::internal(format!("serialize posting: {}", e)))?;

        for token in &tokens {
            self.kv
                .set(&keys::word(token, post_id), &posting)
                .await
                .map_err(kv_err)?;
        }

        let reverse = serde_json::to_string(&tokens)
            .map_err(|e| AppError::internal(format!("serialize token list: {}", e)))?;
        self.kv
            .set(&keys::search_tokens(post_id), &reverse)
            .await
            .map_err(kv_err)
    }

    /// Remove a post from the index using the reverse map.
    pub async fn remove_post(&self, post_id: &str) -> AppResult<()> {
        let reverse_key = keys::search_tokens(post_id);
        let Some(blob) = self.kv.get(&reverse_key).await.map_err(kv_err)? else {
            return Ok(());
        };
        let tokens: Vec<String> = serde_json::from_str(&blob)
            .map_err(|e| AppError::internal(format!("corrupt token list: {}", e)))?;

        for token in &tokens {
            self.kv
                .delete(&keys::word(token, post_id))
                .await
                .map_err(kv_err)?;
        }
        self.kv.delete(&reverse_key).await.map_err(kv_err)
    }

    /// AND-intersection of per-term posting lists, empty when any term has
    /// no postings.
    pub async fn search_post_ids(&self, query: &str) -> AppResult<Vec<String>> {
        let terms: Vec<String> = Self::tokenize(query)
            .into_iter()
            .take(MAX_QUERY_TERMS)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut intersection: Option<HashSet<String>> = None;
        let mut created: HashMap<String, i64> = HashMap::new();

        for term in &terms {
            let prefix = keys::word_prefix(term);
            let postings = self
                .kv
                .list_prefix(&prefix, MAX_POSTINGS_PER_TERM)
                .await
                .map_err(kv_err)?;

            let mut ids = HashSet::new();
            for (key, value) in postings {
                let post_id = key[prefix.len()..].to_string();
                if let Ok(posting) = serde_json::from_str::<Posting>(&value) {
                    created.insert(post_id.clone(), posting.created_at);
                }
                ids.insert(post_id);
            }
            if ids.is_empty() {
                return Ok(Vec::new());
            }

            intersection = Some(match intersection {
                None => ids,
                Some(acc) => acc.intersection(&ids).cloned().collect(),
            });
        }

        let mut result: Vec<String> = intersection.unwrap_or_default().into_iter().collect();
        // Newest first for a stable presentation order.
        result.sort_by_key(|id| std::cmp::Reverse(created.get(id).copied().unwrap_or(0)));
        Ok(result)
    }

    /// Index a user's handle and display-name parts under every prefix of
    /// length 3..=15.
    pub async fn index_user(
        &self,
        user_id: &str,
        handle: &str,
        display_name: &str,
    ) -> AppResult<()> {
        for prefix in prefixes(&handle.to_lowercase()) {
            self.append_user(&keys::handle_prefix(&prefix), user_id)
                .await?;
        }
        for part in display_name.to_lowercase().split_whitespace() {
            for prefix in prefixes(part) {
                self.append_user(&keys::name_prefix(&prefix), user_id)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn remove_user(
        &self,
        user_id: &str,
        handle: &str,
        display_name: &str,
    ) -> AppResult<()> {
        for prefix in prefixes(&handle.to_lowercase()) {
            self.remove_user_from(&keys::handle_prefix(&prefix), user_id)
                .await?;
        }
        for part in display_name.to_lowercase().split_whitespace() {
            for prefix in prefixes(part) {
                self.remove_user_from(&keys::name_prefix(&prefix), user_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Swap the display-name prefixes after a rename; the handle index is
    /// immutable.
    pub async fn reindex_display_name(
        &self,
        user_id: &str,
        old_display_name: &str,
        new_display_name: &str,
    ) -> AppResult<()> {
        for part in old_display_name.to_lowercase().split_whitespace() {
            for prefix in prefixes(part) {
                self.remove_user_from(&keys::name_prefix(&prefix), user_id)
                    .await?;
            }
        }
        for part in new_display_name.to_lowercase().split_whitespace() {
            for prefix in prefixes(part) {
                self.append_user(&keys::name_prefix(&prefix), user_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Union of handle-prefix and name-prefix hits, deduplicated.
    pub async fn search_user_ids(&self, query: &str) -> AppResult<Vec<String>> {
        let prefix: String = query
            .trim()
            .to_lowercase()
            .chars()
            .take(MAX_PREFIX_LEN)
            .collect();
        if prefix.chars().count() < MIN_PREFIX_LEN {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for key in [keys::handle_prefix(&prefix), keys::name_prefix(&prefix)] {
            for user_id in self.load_user_list(&key).await? {
                if seen.insert(user_id.clone()) {
                    result.push(user_id);
                }
            }
        }
        Ok(result)
    }

    async fn load_user_list(&self, key: &str) -> AppResult<Vec<String>> {
        match self.kv.get(key).await.map_err(kv_err)? {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| AppError::internal(format!("corrupt user index list: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    async fn append_user(&self, key: &str, user_id: &str) -> AppResult<()> {
        let mut list = self.load_user_list(key).await?;
        if list.iter().any(|id| id == user_id) {
            return Ok(());
        }
        list.push(user_id.to_string());
        let blob = serde_json::to_string(&list)
            .map_err(|e| AppError::internal(format!("serialize user index list: {}", e)))?;
        self.kv.set(key, &blob).await.map_err(kv_err)
    }

    async fn remove_user_from(&self, key: &str, user_id: &str) -> AppResult<()> {
        let mut list = self.load_user_list(key).await?;
        let before = list.len();
        list.retain(|id| id != user_id);
        if list.len() == before {
            return Ok(());
        }
        if list.is_empty() {
            return self.kv.delete(key).await.map_err(kv_err);
        }
        let blob = serde_json::to_string(&list)
            .map_err(|e| AppError::internal(format!("serialize user index list: {}", e)))?;
        self.kv.set(key, &blob).await.map_err(kv_err)
    }
}

/// Prefixes of a lowercased term, lengths 3..=min(15, len).
fn prefixes(term: &str) -> Vec<String> {
    let chars: Vec<char> = term.chars().collect();
    if chars.len() < MIN_PREFIX_LEN {
        return Vec::new();
    }
    (MIN_PREFIX_LEN..=chars.len().min(MAX_PREFIX_LEN))
        .map(|len| chars[..len].iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_store::MemoryKv;

    fn index() -> SearchIndex {
        SearchIndex::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn test_tokenize_basics() {
        assert_eq!(
            SearchIndex::tokenize("Hello, World! Programming."),
            vec!["hello", "world", "programming"]
        );
    }

    #[test]
    fn test_tokenize_drops_stopwords_and_short_tokens() {
        assert_eq!(
            SearchIndex::tokenize("the quick brown fox is a fox"),
            vec!["quick", "brown", "fox"]
        );
        assert!(SearchIndex::tokenize("a I to").is_empty());
    }

    #[test]
    fn test_tokenize_keeps_mentions_and_hashtags() {
        assert_eq!(
            SearchIndex::tokenize("shoutout @alice for #rustlang"),
            vec!["shoutout", "@alice", "#rustlang"]
        );
        // Bare sigils are too short.
        assert!(SearchIndex::tokenize("@ #").is_empty());
    }

    #[test]
    fn test_tokenize_caps_token_count() {
        let content = (0..100)
            .map(|i| format!("token{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(SearchIndex::tokenize(&content).len(), MAX_TOKENS_PER_POST);
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(prefixes("al"), Vec::<String>::new());
        assert_eq!(prefixes("alice"), vec!["ali", "alic", "alice"]);
        let long = prefixes("abcdefghijklmnopqrst");
        assert_eq!(long.last().unwrap().len(), 15);
    }

    #[tokio::test]
    async fn test_post_search_is_and_semantics() {
        let idx = index();
        idx.index_post("1", "hello world programming", 300)
            .await
            .unwrap();
        idx.index_post("2", "hello typescript", 200).await.unwrap();
        idx.index_post("3", "rust world", 100).await.unwrap();

        assert_eq!(idx.search_post_ids("hello world").await.unwrap(), vec!["1"]);
        let hello: HashSet<String> =
            idx.search_post_ids("hello").await.unwrap().into_iter().collect();
        assert_eq!(
            hello,
            ["1", "2"].iter().map(|s| s.to_string()).collect::<HashSet<_>>()
        );
        assert!(idx.search_post_ids("hello nothing").await.unwrap().is_empty());
        assert!(idx.search_post_ids("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_post_leaves_no_keys() {
        let kv = Arc::new(MemoryKv::new());
        let idx = SearchIndex::new(kv.clone());
        idx.index_post("7", "searchable content here", 1).await.unwrap();
        assert!(!kv.list_prefix("word:", 100).await.unwrap().is_empty());

        idx.remove_post("7").await.unwrap();
        assert!(kv.list_prefix("word:", 100).await.unwrap().is_empty());
        assert!(kv.get("idx:7").await.unwrap().is_none());
        // Removing again is a no-op.
        idx.remove_post("7").await.unwrap();
    }

    #[tokio::test]
    async fn test_user_search_unions_handle_and_name() {
        let idx = index();
        idx.index_user("1", "alice", "Alice Wonder").await.unwrap();
        idx.index_user("2", "alastor", "Bob").await.unwrap();

        let hits = idx.search_user_ids("ali").await.unwrap();
        assert_eq!(hits, vec!["1"]);

        let hits = idx.search_user_ids("ala").await.unwrap();
        assert_eq!(hits, vec!["2"]);

        // Display-name part match.
        let hits = idx.search_user_ids("wonder").await.unwrap();
        assert_eq!(hits, vec!["1"]);

        // Too-short query.
        assert!(idx.search_user_ids("al").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reindex_display_name_moves_prefixes() {
        let idx = index();
        idx.index_user("1", "alice", "Wonder").await.unwrap();
        assert_eq!(idx.search_user_ids("wonder").await.unwrap(), vec!["1"]);

        idx.reindex_display_name("1", "Wonder", "Builder").await.unwrap();
        assert!(idx.search_user_ids("wonder").await.unwrap().is_empty());
        assert_eq!(idx.search_user_ids("builder").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_remove_user_clears_prefixes() {
        let idx = index();
        idx.index_user("1", "alice", "Alice").await.unwrap();
        idx.remove_user("1", "alice", "Alice").await.unwrap();
        assert!(idx.search_user_ids("alice").await.unwrap().is_empty());
    }
}
