//! Extraction: turn the fetched catalog into a list of files to write.
//!
//! Joins articles to their category and knowledge base, applies the
//! allow-list, builds sanitized output paths, and resolves path collisions.
//! Everything here is pure: no I/O, no failure modes, same input → same plan.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, info, instrument, warn};

use kbmirror_shared::{AllowList, Article, Catalog, Category, KnowledgeBase};

use crate::sanitize::sanitize_segment;
use crate::writer::MANIFEST_FILE;

/// File extension for article files.
pub const ARTICLE_EXTENSION: &str = "md";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One article to write, with everything the header needs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputUnit<'a> {
    /// Path relative to the output root, e.g. `IT/Security/What-is-Spam.md`.
    pub path: PathBuf,
    pub knowledge_base: &'a KnowledgeBase,
    /// `None` for articles filed directly under their knowledge base.
    pub category: Option<&'a Category>,
    pub article: &'a Article,
}

/// Why a run produced no output units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The instance returned no knowledge bases at all.
    NoKnowledgeBases,
    /// None of the allow-listed names matched a knowledge base.
    NoKnowledgeBasesMatched,
    /// The instance returned no articles at all.
    NoArticles,
    /// Articles exist but none survived filtering and resolution.
    AllArticlesExcluded,
}

impl std::fmt::Display for EmptyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::NoKnowledgeBases => "no knowledge bases were found on the instance",
            Self::NoKnowledgeBasesMatched => "no knowledge base matched the allow-list",
            Self::NoArticles => "no articles were found on the instance",
            Self::AllArticlesExcluded => "every article was filtered out or unresolved",
        };
        f.write_str(msg)
    }
}

/// Counts describing what extraction kept and why it dropped the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub knowledge_bases_total: usize,
    pub knowledge_bases_selected: usize,
    pub categories_kept: usize,
    /// Categories that resolve to no fetched knowledge base.
    pub categories_orphaned: usize,
    /// Categories belonging to a knowledge base the allow-list excludes.
    pub categories_filtered: usize,
    pub articles_kept: usize,
    /// Articles whose category is unknown or orphaned.
    pub articles_unresolved: usize,
    /// Articles in a knowledge base the allow-list excludes.
    pub articles_filtered: usize,
    /// Uncategorized articles with no usable knowledge base.
    pub articles_unassigned: usize,
    /// Rows rejected at the fetch boundary.
    pub rejected_records: usize,
    /// Articles renamed to avoid a path clash.
    pub collisions_resolved: usize,
    /// Allow-list names that matched no knowledge base.
    pub unmatched_allow_list: Vec<String>,
    pub empty_reason: Option<EmptyReason>,
}

impl ExtractionReport {
    /// Articles dropped for any reason.
    pub fn articles_skipped(&self) -> usize {
        self.articles_unresolved + self.articles_filtered + self.articles_unassigned
    }
}

/// The result of extraction: sorted units plus the report.
#[derive(Debug, Clone)]
pub struct ExtractionPlan<'a> {
    pub units: Vec<OutputUnit<'a>>,
    pub report: ExtractionReport,
}

impl ExtractionPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Where a category landed after knowledge-base resolution.
#[derive(Debug, Clone, Copy)]
enum CategoryState<'a> {
    Kept(&'a Category, &'a KnowledgeBase),
    Filtered,
    Orphaned,
}

/// An article that survived filtering, before collision resolution.
struct Candidate<'a> {
    dir: PathBuf,
    stem: String,
    knowledge_base: &'a KnowledgeBase,
    category: Option<&'a Category>,
    article: &'a Article,
}

impl Candidate<'_> {
    fn key(&self, stem: &str) -> String {
        path_key(&self.dir, stem)
    }
}

/// Build the output plan for a catalog.
///
/// Units come back sorted by knowledge-base name, category name, article
/// title, then article `sys_id`. Distinct units always have distinct paths,
/// compared case-insensitively.
#[instrument(skip_all, fields(
    knowledge_bases = catalog.knowledge_bases.len(),
    categories = catalog.categories.len(),
    articles = catalog.articles.len(),
))]
pub fn extract<'a>(catalog: &'a Catalog, allow_list: &AllowList) -> ExtractionPlan<'a> {
    let mut report = ExtractionReport {
        knowledge_bases_total: catalog.knowledge_bases.len(),
        rejected_records: catalog.rejected.len(),
        ..ExtractionReport::default()
    };

    // --- Knowledge bases ---
    let knowledge_bases: BTreeMap<&str, &KnowledgeBase> = catalog
        .knowledge_bases
        .iter()
        .map(|kb| (kb.sys_id.as_str(), kb))
        .collect();
    let selected: BTreeSet<&str> = catalog
        .knowledge_bases
        .iter()
        .filter(|kb| allow_list.allows(&kb.name))
        .map(|kb| kb.sys_id.as_str())
        .collect();
    report.knowledge_bases_selected = selected.len();

    report.unmatched_allow_list = allow_list
        .unmatched(catalog.knowledge_bases.iter().map(|kb| kb.name.as_str()));
    for name in &report.unmatched_allow_list {
        warn!(name = %name, "allow-listed knowledge base not found on instance");
    }

    // --- Categories ---
    let categories = resolve_categories(catalog, &knowledge_bases, &selected, &mut report);

    // --- Articles ---
    let mut candidates = Vec::new();
    for article in &catalog.articles {
        let placement = match article.category.as_deref() {
            Some(category_id) => match categories.get(category_id) {
                Some(CategoryState::Kept(category, kb)) => Some((*kb, Some(*category))),
                Some(CategoryState::Filtered) => {
                    debug!(sys_id = %article.sys_id, "article in excluded knowledge base");
                    report.articles_filtered += 1;
                    None
                }
                Some(CategoryState::Orphaned) | None => {
                    warn!(
                        sys_id = %article.sys_id,
                        category = %category_id,
                        "skipping article with unresolved category"
                    );
                    report.articles_unresolved += 1;
                    None
                }
            },
            None => {
                let kb = article
                    .knowledge_base
                    .as_deref()
                    .and_then(|id| knowledge_bases.get(id).copied());
                match kb {
                    Some(kb) if selected.contains(kb.sys_id.as_str()) => Some((kb, None)),
                    Some(_) => {
                        report.articles_filtered += 1;
                        None
                    }
                    None => {
                        warn!(sys_id = %article.sys_id, "skipping article with no knowledge base");
                        report.articles_unassigned += 1;
                        None
                    }
                }
            }
        };

        if let Some((knowledge_base, category)) = placement {
            let mut dir = PathBuf::from(knowledge_base_segment(knowledge_base));
            if let Some(category) = category {
                dir.push(sanitize_segment(&category.name));
            }
            candidates.push(Candidate {
                dir,
                stem: sanitize_segment(&article.title),
                knowledge_base,
                category,
                article,
            });
        }
    }

    // --- Paths ---
    let mut units = assign_paths(candidates, &mut report);
    units.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    report.articles_kept = units.len();
    if units.is_empty() {
        report.empty_reason = Some(empty_reason(catalog, allow_list, &report));
    }

    info!(
        kept = report.articles_kept,
        skipped = report.articles_skipped(),
        collisions = report.collisions_resolved,
        "extraction complete"
    );

    ExtractionPlan { units, report }
}

/// Resolve each category's knowledge base, inheriting from ancestors.
fn resolve_categories<'a>(
    catalog: &'a Catalog,
    knowledge_bases: &BTreeMap<&str, &'a KnowledgeBase>,
    selected: &BTreeSet<&str>,
    report: &mut ExtractionReport,
) -> BTreeMap<&'a str, CategoryState<'a>> {
    let by_id: BTreeMap<&str, &Category> = catalog
        .categories
        .iter()
        .map(|c| (c.sys_id.as_str(), c))
        .collect();

    let mut states = BTreeMap::new();
    for category in &catalog.categories {
        let state = match owning_knowledge_base(category, &by_id, knowledge_bases) {
            Some(kb) if selected.contains(kb.sys_id.as_str()) => {
                report.categories_kept += 1;
                CategoryState::Kept(category, kb)
            }
            Some(_) => {
                report.categories_filtered += 1;
                CategoryState::Filtered
            }
            None => {
                debug!(sys_id = %category.sys_id, name = %category.name, "orphaned category");
                report.categories_orphaned += 1;
                CategoryState::Orphaned
            }
        };
        states.insert(category.sys_id.as_str(), state);
    }
    states
}

/// Walk up the parent chain until a category names its knowledge base.
fn owning_knowledge_base<'a>(
    category: &Category,
    by_id: &BTreeMap<&str, &Category>,
    knowledge_bases: &BTreeMap<&str, &'a KnowledgeBase>,
) -> Option<&'a KnowledgeBase> {
    let mut visited = BTreeSet::new();
    let mut current = category;

    loop {
        if let Some(kb_id) = current.knowledge_base.as_deref() {
            return knowledge_bases.get(kb_id).copied();
        }
        if !visited.insert(current.sys_id.as_str()) {
            return None;
        }
        current = by_id.get(current.parent.as_deref()?)?;
    }
}

/// Top-level directory for a knowledge base. Never shadows the manifest.
fn knowledge_base_segment(knowledge_base: &KnowledgeBase) -> String {
    let segment = sanitize_segment(&knowledge_base.name);
    if segment.eq_ignore_ascii_case(MANIFEST_FILE) {
        format!("{segment}-{}", sanitize_segment(&knowledge_base.sys_id))
    } else {
        segment
    }
}

/// Give every candidate a unique path.
///
/// Within a group of case-insensitively equal paths, ordered by `sys_id`,
/// the first keeps its name; later ones get `-<sys_id>`, then `-2`, `-3`, …
/// Directories in use count as taken, so an article file never lands on a
/// category directory of the same name.
fn assign_paths<'a>(
    mut candidates: Vec<Candidate<'a>>,
    report: &mut ExtractionReport,
) -> Vec<OutputUnit<'a>> {
    candidates.sort_by(|a, b| {
        a.key(&a.stem)
            .cmp(&b.key(&b.stem))
            .then_with(|| a.article.sys_id.cmp(&b.article.sys_id))
    });

    let mut taken: BTreeSet<String> = candidates
        .iter()
        .flat_map(|c| c.dir.ancestors())
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.to_string_lossy().to_lowercase())
        .collect();

    // Group leaders claim their plain names before anyone is renamed.
    let mut is_leader = Vec::with_capacity(candidates.len());
    for candidate in &candidates {
        is_leader.push(taken.insert(candidate.key(&candidate.stem)));
    }

    candidates
        .into_iter()
        .zip(is_leader)
        .map(|(candidate, leader)| {
            let stem = if leader {
                candidate.stem.clone()
            } else {
                let renamed = unique_stem(&candidate, &mut taken);
                debug!(
                    sys_id = %candidate.article.sys_id,
                    from = %candidate.stem,
                    to = %renamed,
                    "resolved path collision"
                );
                report.collisions_resolved += 1;
                renamed
            };

            OutputUnit {
                path: candidate.dir.join(format!("{stem}.{ARTICLE_EXTENSION}")),
                knowledge_base: candidate.knowledge_base,
                category: candidate.category,
                article: candidate.article,
            }
        })
        .collect()
}

fn unique_stem(candidate: &Candidate<'_>, taken: &mut BTreeSet<String>) -> String {
    let base = format!("{}-{}", candidate.stem, candidate.article.sys_id);
    if taken.insert(candidate.key(&base)) {
        return base;
    }
    let mut n = 2;
    loop {
        let stem = format!("{base}-{n}");
        if taken.insert(candidate.key(&stem)) {
            return stem;
        }
        n += 1;
    }
}

/// Case-insensitive identity of a relative output file path.
fn path_key(dir: &std::path::Path, stem: &str) -> String {
    dir.join(format!("{stem}.{ARTICLE_EXTENSION}"))
        .to_string_lossy()
        .to_lowercase()
}

fn sort_key<'u>(unit: &'u OutputUnit<'_>) -> (&'u str, &'u str, &'u str, &'u str) {
    (
        unit.knowledge_base.name.as_str(),
        unit.category.map_or("", |c| c.name.as_str()),
        unit.article.title.as_str(),
        unit.article.sys_id.as_str(),
    )
}

fn empty_reason(catalog: &Catalog, allow_list: &AllowList, report: &ExtractionReport) -> EmptyReason {
    if catalog.knowledge_bases.is_empty() {
        EmptyReason::NoKnowledgeBases
    } else if !allow_list.is_empty() && report.knowledge_bases_selected == 0 {
        EmptyReason::NoKnowledgeBasesMatched
    } else if catalog.articles.is_empty() {
        EmptyReason::NoArticles
    } else {
        EmptyReason::AllArticlesExcluded
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
