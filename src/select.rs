//! Chapter selection: one version per chapter number, then filters.
//!
//! A site usually lists the same chapter several times, once per scan group.
//! Selection groups the pool by numeric chapter value, keeps one version per
//! number and applies the partial and range filters. Chapters whose label is
//! not a finite number ("Extra", "Omake") never enter that flow: they are
//! collected in [`Selection::specials`] and reported, but not downloaded.

use log::{debug, info};

use crate::error::{Error, Result};
use crate::source::SiteAdapter;
use crate::types::ChapterRecord;

/// User preferences driving selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCriteria {
    /// Preferred scan groups, highest priority first.
    pub groups: Vec<String>,
    pub mix_by_upvote: bool,
    pub no_partials: bool,
    /// Range spec such as `"1-5,7,9.5"`, or `"all"`.
    pub chapters: String,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            mix_by_upvote: false,
            no_partials: false,
            chapters: "all".to_string(),
        }
    }
}

/// Outcome of selection, in ascending chapter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub chapters: Vec<ChapterRecord>,
    /// Chapters with a non-numeric label.
    pub specials: Vec<ChapterRecord>,
}

/// Splits comma-separated entries so `["A,B", "C"]` becomes `["A", "B", "C"]`.
pub fn flatten_groups(groups: &[String]) -> Vec<String> {
    groups
        .iter()
        .flat_map(|g| g.split(','))
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(String::from)
        .collect()
}

/// The version with the most upvotes; the earliest wins a tie.
fn most_upvoted<'a>(versions: impl IntoIterator<Item = &'a ChapterRecord>) -> Option<&'a ChapterRecord> {
    versions.into_iter().fold(None, |best: Option<&ChapterRecord>, v| match best {
        Some(b) if b.up_count >= v.up_count => Some(b),
        _ => Some(v),
    })
}

/// Picks one version of a chapter.
///
/// - no preferred groups: most upvoted overall;
/// - `mix_by_upvote`: most upvoted among preferred groups, else overall;
/// - otherwise the first preferred group that has a version wins (its most
///   upvoted version), else most upvoted overall.
pub fn best_version<'a, F>(
    versions: &'a [ChapterRecord],
    preferred_groups: &[String],
    mix_by_upvote: bool,
    group_of: F,
) -> Option<&'a ChapterRecord>
where
    F: Fn(&ChapterRecord) -> Option<String>,
{
    let label = versions.first().map(|v| v.chap.as_str()).unwrap_or("?");
    let fallback = most_upvoted(versions)?;

    if preferred_groups.is_empty() {
        debug!(
            "    Ch {}: No group specified. Selected by upvotes ({}).",
            label, fallback.up_count
        );
        return Some(fallback);
    }

    let in_group = |v: &ChapterRecord, group: &str| group_of(v).as_deref() == Some(group);

    if mix_by_upvote {
        let preferred = versions
            .iter()
            .filter(|v| preferred_groups.iter().any(|g| in_group(*v, g.as_str())));
        if let Some(best) = most_upvoted(preferred) {
            debug!(
                "    Ch {}: Mix-by-upvote. Selected '{}' ({} upvotes).",
                label,
                group_of(best).unwrap_or_default(),
                best.up_count
            );
            return Some(best);
        }
        debug!("    Ch {}: Mix-by-upvote. No preferred groups found. Fallback to upvotes.", label);
        return Some(fallback);
    }

    for group in preferred_groups {
        if let Some(best) = most_upvoted(versions.iter().filter(|v| in_group(*v, group.as_str()))) {
            debug!("    Ch {}: Found in priority group '{}'. Selected.", label, group);
            return Some(best);
        }
    }
    debug!("    Ch {}: No priority groups found. Fallback to upvotes.", label);
    Some(fallback)
}

/// True if `n` falls in the comma-separated spec of numbers and inclusive
/// `start-end` ranges. Malformed parts are ignored; `"all"` matches
/// everything.
pub fn is_chapter_wanted(n: f64, spec: &str) -> bool {
    if spec.trim().eq_ignore_ascii_case("all") {
        return true;
    }
    spec.split(',').map(str::trim).any(|part| {
        if part.contains('-') {
            let bounds: Vec<&str> = part.split('-').map(str::trim).collect();
            match bounds.as_slice() {
                [start, end] => match (start.parse::<f64>(), end.parse::<f64>()) {
                    (Ok(start), Ok(end)) => start <= n && n <= end,
                    _ => false,
                },
                _ => false,
            }
        } else {
            part.parse::<f64>().is_ok_and(|value| value == n)
        }
    })
}

/// Groups the pool by numeric value, ascending. Non-numeric chapters are
/// returned separately in pool order.
pub fn group_by_number(
    pool: Vec<ChapterRecord>,
) -> (Vec<(f64, Vec<ChapterRecord>)>, Vec<ChapterRecord>) {
    let mut groups: Vec<(f64, Vec<ChapterRecord>)> = Vec::new();
    let mut specials = Vec::new();

    for chapter in pool {
        let Some(number) = chapter.number() else {
            specials.push(chapter);
            continue;
        };
        match groups.iter_mut().find(|(n, _)| *n == number) {
            Some((_, versions)) => versions.push(chapter),
            None => groups.push((number, vec![chapter])),
        }
    }
    groups.sort_by(|a, b| a.0.total_cmp(&b.0));
    (groups, specials)
}

/// Runs the full selection for `adapter`'s chapter pool.
pub fn select_chapters(
    adapter: &dyn SiteAdapter,
    pool: Vec<ChapterRecord>,
    criteria: &SelectionCriteria,
) -> Selection {
    debug!("Filtering chapters based on preferences...");
    let (groups, specials) = group_by_number(pool);
    for special in &specials {
        info!("  Chapter '{}' has no numeric label; listed as special, not downloaded", special.chap);
    }

    let mut chapters: Vec<ChapterRecord> = groups
        .iter()
        .filter_map(|(_, versions)| {
            adapter
                .select_best_version(versions, &criteria.groups, criteria.mix_by_upvote)
                .cloned()
        })
        .collect();

    if criteria.no_partials {
        let before = chapters.len();
        chapters.retain(|c| !c.is_partial());
        debug!(
            "  --no-partials: Filtered out {} partial chapters.",
            before - chapters.len()
        );
    }

    if !criteria.chapters.trim().eq_ignore_ascii_case("all") {
        chapters.retain(|c| {
            c.number()
                .is_some_and(|n| is_chapter_wanted(n, &criteria.chapters))
        });
        debug!(
            "  --chapters '{}': Filtered list down to {} chapters.",
            criteria.chapters,
            chapters.len()
        );
    }

    Selection { chapters, specials }
}

impl Selection {
    /// Fails when nothing is left to download.
    pub fn require_chapters(self) -> Result<Self> {
        if self.chapters.is_empty() {
            return Err(Error::NoChapters(
                "no chapter matched the requested groups, range and filters".to_string(),
            ));
        }
        Ok(self)
    }
}
