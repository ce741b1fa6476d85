//! Langlinks lookups against the MediaWiki API.
//!
//! Queries resolve redirects on the server side, so the returned page is
//! already canonical. Every response lands in an on-disk cache keyed by the
//! full query URL; repeated sync runs mostly never touch the network.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use mediawiki::api::Api;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{event, Level};

use super::SyncError;
use crate::types::NamespaceID;

/// A page as the langlinks query reports it; `missing` marks dead titles and
/// failed lookups alike.
#[derive(PartialEq, Eq, Clone, Debug, Default, Serialize, Deserialize)]
pub struct MayMissingPage {
    #[serde(rename = "pageid", default)]
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "ns", default)]
    pub namespace: NamespaceID,
    #[serde(default)]
    pub missing: bool,
    #[serde(rename = "langlinks", default)]
    pub lang_links: Vec<LangLink>,
}

#[derive(PartialEq, Eq, Clone, Debug, Serialize, Deserialize)]
pub struct LangLink {
    pub lang: String,
    pub title: String,
}

/// On-disk cache of langlinks responses keyed by the full query URL.
pub struct QueryCache {
    path: PathBuf,
    entries: HashMap<String, MayMissingPage>,
}

impl QueryCache {
    pub const DEFAULT_PATH: &'static str = ".query2PageCache.json";

    /// Opens the cache at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        QueryCache { path, entries }
    }

    pub fn save(&self) -> Result<(), SyncError> {
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }

    fn get(&self, query: &str) -> Option<&MayMissingPage> {
        self.entries.get(query)
    }

    fn insert(&mut self, query: String, page: MayMissingPage) {
        self.entries.insert(query, page);
    }
}

/// Langlinks client with one lazily created `Api` handle per language.
pub struct LangLinksClient {
    apis: HashMap<String, Api>,
    cache: QueryCache,
}

impl LangLinksClient {
    pub fn new(cache: QueryCache) -> Self {
        LangLinksClient {
            apis: HashMap::new(),
            cache,
        }
    }

    pub fn save_cache(&self) -> Result<(), SyncError> {
        self.cache.save()
    }

    /// The langlinks of `title` on the `lang` edition, restricted to one
    /// namespace. Lookup failures come back as missing pages, the same as a
    /// dead title would.
    pub async fn lang_links(
        &mut self,
        lang: &str,
        title: &str,
        namespace: NamespaceID,
    ) -> MayMissingPage {
        let query = format!(
            "https://{}.wikipedia.org/w/api.php?action=query&prop=langlinks&lllimit=max&redirects&format=json&formatversion=2&titles={}",
            lang,
            urlencoding::encode(title),
        );
        if let Some(page) = self.cache.get(&query) {
            return page.clone();
        }

        let mut page = MayMissingPage {
            title: title.to_string(),
            missing: true,
            ..Default::default()
        };
        match self.fetch(lang, title).await {
            Ok(Some(found)) if !found.missing && found.namespace == namespace => page = found,
            Ok(Some(found)) if found.missing => {
                event!(Level::WARN, lang, title, "page not found");
            }
            Ok(Some(found)) => {
                event!(
                    Level::WARN,
                    lang,
                    title,
                    expected = namespace,
                    found = found.namespace,
                    "page in the wrong namespace"
                );
            }
            Ok(None) => {
                event!(Level::WARN, lang, title, "query returned an empty page list");
            }
            Err(e) => {
                event!(Level::WARN, lang, title, error = %e, "page discarded");
            }
        }
        self.cache.insert(query, page.clone());
        page
    }

    async fn fetch(&mut self, lang: &str, title: &str) -> Result<Option<MayMissingPage>, SyncError> {
        let api = match self.apis.entry(lang.to_string()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let api = Api::new(&format!("https://{}.wikipedia.org/w/api.php", lang)).await?;
                slot.insert(api)
            }
        };
        let params = api.params_into(&[
            ("action", "query"),
            ("prop", "langlinks"),
            ("lllimit", "max"),
            ("redirects", "1"),
            ("formatversion", "2"),
            ("titles", title),
        ]);

        // exponential backoff before giving the page up
        let mut wait = Duration::from_secs(1);
        let response = loop {
            match api.get_query_api_json_all(&params).await {
                Ok(response) => break response,
                Err(e) if wait >= Duration::from_secs(64) => return Err(SyncError::MediaWiki(e)),
                Err(_) => {
                    sleep(wait).await;
                    wait *= 2;
                }
            }
        };

        let pages = &response["query"]["pages"];
        match pages.as_array() {
            Some(list) if !list.is_empty() => {
                Ok(Some(serde_json::from_value(list[0].clone())?))
            }
            _ => Ok(None),
        }
    }
}
