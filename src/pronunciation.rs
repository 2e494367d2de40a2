use crate::error::{PipelineError, Result};
use crate::tts::{DictionaryBackend, DictionaryRef};
use regex::{NoExpand, Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Name -> remote reference cache backed by a single JSON file.
///
/// Every call reads the whole file and, for mutations, writes it back
/// before returning. Concurrent writers are not coordinated.
#[derive(Debug, Clone)]
pub struct DictionaryCache {
    path: PathBuf,
}

impl DictionaryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, DictionaryRef>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, entries: &BTreeMap<String, DictionaryRef>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<DictionaryRef>> {
        Ok(self.load()?.remove(name))
    }

    pub fn insert(&self, name: &str, reference: &DictionaryRef) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(name.to_string(), reference.clone());
        self.save(&entries)
    }

    /// Returns whether the name was cached.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut entries = self.load()?;
        let removed = entries.remove(name).is_some();
        if removed {
            self.save(&entries)?;
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub grapheme: String,
    pub alias: String,
}

/// Ordered grapheme -> alias table, longest grapheme first.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionTable {
    rules: Vec<(Substitution, Regex)>,
}

impl SubstitutionTable {
    pub fn new(mut pairs: Vec<Substitution>) -> Result<Self> {
        pairs.retain(|p| !p.grapheme.is_empty());
        // stable sort keeps file order among equal lengths
        pairs.sort_by(|a, b| b.grapheme.chars().count().cmp(&a.grapheme.chars().count()));
        let mut rules = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let re = RegexBuilder::new(&regex::escape(&pair.grapheme))
                .case_insensitive(true)
                .build()
                .map_err(|e| PipelineError::DictionaryUnavailable(e.to_string()))?;
            rules.push((pair, re));
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &Substitution> {
        self.rules.iter().map(|(p, _)| p)
    }

    /// Apply every pair as a global, case-insensitive replace, in order.
    ///
    /// Later pairs also see text produced by earlier ones, so an alias that
    /// contains another grapheme gets substituted again. Callers must apply
    /// this once per text.
    pub fn apply(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (pair, re) in &self.rules {
            if re.is_match(&out) {
                out = re.replace_all(&out, NoExpand(&pair.alias)).into_owned();
            }
        }
        out
    }
}

/// Outcome of resolving a dictionary name.
#[derive(Debug, Clone)]
pub enum Pronunciation {
    Remote {
        name: String,
        reference: DictionaryRef,
    },
    Local {
        name: String,
        table: SubstitutionTable,
    },
}

impl Pronunciation {
    pub fn name(&self) -> &str {
        match self {
            Pronunciation::Remote { name, .. } | Pronunciation::Local { name, .. } => name,
        }
    }

    pub fn remote_reference(&self) -> Option<&DictionaryRef> {
        match self {
            Pronunciation::Remote { reference, .. } => Some(reference),
            Pronunciation::Local { .. } => None,
        }
    }

    /// Text as it should be sent to the backend.
    pub fn prepare_text(&self, text: &str) -> String {
        match self {
            Pronunciation::Remote { .. } => text.to_string(),
            Pronunciation::Local { table, .. } => table.apply(text),
        }
    }
}

pub struct PronunciationResolver<'a> {
    backend: &'a dyn DictionaryBackend,
    cache: &'a DictionaryCache,
    dictionary_dir: PathBuf,
}

impl<'a> PronunciationResolver<'a> {
    pub fn new(
        backend: &'a dyn DictionaryBackend,
        cache: &'a DictionaryCache,
        dictionary_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            cache,
            dictionary_dir: dictionary_dir.into(),
        }
    }

    pub fn definition_path(&self, name: &str) -> PathBuf {
        self.dictionary_dir.join(format!("{}.pls", name))
    }

    /// Resolve a dictionary name. `None` in means `None` out.
    ///
    /// Every failure along the way is logged and absorbed: a broken cache
    /// counts as a miss, remote errors degrade to local substitution and an
    /// unreadable local definition yields an empty table.
    pub async fn resolve(&self, name: Option<&str>) -> Result<Option<Pronunciation>> {
        let Some(name) = name else {
            return Ok(None);
        };

        match self.cache.get(name) {
            Ok(Some(reference)) => {
                debug!("Dictionary '{}' found in cache: {}", name, reference.id);
                return Ok(Some(Pronunciation::Remote {
                    name: name.to_string(),
                    reference,
                }));
            }
            Ok(None) => {}
            Err(e) => warn!(
                "Dictionary cache {} unreadable ({}); treating '{}' as uncached",
                self.cache.path().display(),
                e,
                name
            ),
        }

        match self.resolve_remote(name).await {
            Ok(reference) => {
                if let Err(e) = self.cache.insert(name, &reference) {
                    warn!(
                        "Could not cache dictionary '{}' in {}: {}",
                        name,
                        self.cache.path().display(),
                        e
                    );
                }
                info!(
                    "Using remote dictionary '{}' ({} @ {})",
                    name, reference.id, reference.version_id
                );
                Ok(Some(Pronunciation::Remote {
                    name: name.to_string(),
                    reference,
                }))
            }
            Err(e) => {
                warn!(
                    "Remote dictionary '{}' unavailable ({}); falling back to local substitution",
                    name, e
                );
                let table = self.load_local(name);
                info!("Loaded {} local substitutions for '{}'", table.len(), name);
                Ok(Some(Pronunciation::Local {
                    name: name.to_string(),
                    table,
                }))
            }
        }
    }

    async fn resolve_remote(&self, name: &str) -> Result<DictionaryRef> {
        let listing = self
            .backend
            .list_dictionaries()
            .await
            .map_err(|e| PipelineError::DictionaryUnavailable(e.to_string()))?;
        if let Some(found) = listing.into_iter().find(|d| d.name == name) {
            return Ok(DictionaryRef {
                id: found.id,
                version_id: found.latest_version_id,
            });
        }

        let path = self.definition_path(name);
        if !path.exists() {
            return Err(PipelineError::DictionaryUnavailable(format!(
                "no remote dictionary named '{}' and no local file {}",
                name,
                path.display()
            )));
        }
        info!("Uploading dictionary '{}' from {}", name, path.display());
        self.backend
            .upload_dictionary(&path, name)
            .await
            .map_err(|e| PipelineError::DictionaryUnavailable(e.to_string()))
    }

    fn load_local(&self, name: &str) -> SubstitutionTable {
        let path = self.definition_path(name);
        if !path.exists() {
            warn!(
                "No local definition for dictionary '{}' at {}; text goes out unchanged",
                name,
                path.display()
            );
            return SubstitutionTable::default();
        }
        let table = match fs::read_to_string(&path)
            .map_err(PipelineError::from)
            .and_then(|data| SubstitutionTable::new(parse_lexicon(&data)))
        {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    "Cannot use local definition {} ({}); text goes out unchanged",
                    path.display(),
                    e
                );
                return SubstitutionTable::default();
            }
        };
        if table.is_empty() {
            warn!("{} has no alias lexemes; text goes out unchanged", path.display());
        }
        for pair in table.pairs() {
            debug!("{} -> {}", pair.grapheme, pair.alias);
        }
        table
    }
}

static LEXEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<lexeme\b[^>]*>(.*?)</lexeme>").unwrap());
static GRAPHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<grapheme\b[^>]*>(.*?)</grapheme>").unwrap());
static ALIAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<alias\b[^>]*>(.*?)</alias>").unwrap());

/// Extract `(grapheme, alias)` pairs from a PLS lexicon. Lexemes without an
/// alias (phoneme-only) are skipped.
pub fn parse_lexicon(xml: &str) -> Vec<Substitution> {
    let mut pairs = Vec::new();
    for lexeme in LEXEME_RE.captures_iter(xml) {
        let body = &lexeme[1];
        let Some(alias) = ALIAS_RE.captures(body) else {
            continue;
        };
        let alias = decode_entities(alias[1].trim());
        for grapheme in GRAPHEME_RE.captures_iter(body) {
            let grapheme = decode_entities(grapheme[1].trim());
            if !grapheme.is_empty() {
                pairs.push(Substitution {
                    grapheme,
                    alias: alias.clone(),
                });
            }
        }
    }
    pairs
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
