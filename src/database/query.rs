//! File search: name patterns, conjunctive tag filters and pagination.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use crate::database::entity::{self, placeholders, Entity};
use crate::database::models::{File, FileLazy};
use crate::error::Result;

/// Files are shown in pages of random picks when nothing is searched.
pub const DEFAULT_RANDOM_SAMPLE: usize = 9;

/// Parameters of a file search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSearch {
    pattern: Option<String>,
    tags: Vec<i64>,
    offset: Option<usize>,
    limit: Option<usize>,
    random_sample: Option<usize>,
}

impl FileSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters on the file name. Whitespace separated tokens must appear
    /// in order: `"a b"` becomes the pattern `%a%b%`. Blank input clears
    /// the filter.
    pub fn name(mut self, raw: &str) -> Self {
        self.pattern = name_pattern(raw);
        self
    }

    /// Only files carrying every one of these tags match.
    pub fn tags<I: IntoIterator<Item = i64>>(mut self, tags: I) -> Self {
        let mut tags: Vec<i64> = tags.into_iter().collect();
        tags.sort_unstable();
        tags.dedup();
        self.tags = tags;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// An empty search returns up to `size` random files instead of nothing.
    pub fn random_sample(mut self, size: usize) -> Self {
        self.random_sample = Some(size);
        self
    }

    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    pub fn tag_ids(&self) -> &[i64] {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.tags.is_empty()
    }
}

/// Builds the `%`-wildcard pattern for a free text filter.
pub fn name_pattern(raw: &str) -> Option<String> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    Some(format!("%{}%", tokens.join("%")))
}

/// Translates a `%`-wildcard pattern to a case-sensitive SQLite `GLOB`.
pub(crate) fn to_glob(pattern: &str) -> String {
    let mut glob = String::with_capacity(pattern.len() + 8);
    for c in pattern.chars() {
        match c {
            '%' => glob.push('*'),
            '*' => glob.push_str("[*]"),
            '?' => glob.push_str("[?]"),
            '[' => glob.push_str("[[]"),
            other => glob.push(other),
        }
    }
    glob
}

/// Sub-select of the ids of files carrying all `n` tags bound after it.
pub(crate) fn files_with_all_tags(n: usize) -> String {
    format!(
        "SELECT file_id FROM file_tags WHERE tag_id IN ({}) GROUP BY file_id HAVING COUNT(DISTINCT tag_id) = ?",
        placeholders(n)
    )
}

pub(crate) fn tag_values(tags: &[i64]) -> impl Iterator<Item = Value> + '_ {
    tags.iter()
        .map(|id| Value::Integer(*id))
        .chain(std::iter::once(Value::Integer(tags.len() as i64)))
}

pub fn search_files(conn: &Connection, search: &FileSearch) -> Result<Vec<FileLazy>> {
    if search.is_empty() {
        return match search.random_sample {
            Some(size) => entity::get_random::<File>(conn, size),
            None => Ok(Vec::new()),
        };
    }

    let mut sql = format!("{} WHERE 1 = 1", File::SELECT);
    let mut values: Vec<Value> = Vec::new();
    if let Some(pattern) = &search.pattern {
        sql.push_str(" AND e.name GLOB ?");
        values.push(Value::Text(to_glob(pattern)));
    }
    if !search.tags.is_empty() {
        sql.push_str(&format!(" AND e.id IN ({})", files_with_all_tags(search.tags.len())));
        values.extend(tag_values(&search.tags));
    }
    sql.push_str(" ORDER BY e.name, e.id LIMIT ? OFFSET ?");
    values.push(Value::Integer(search.limit.map_or(-1, |l| l as i64)));
    values.push(Value::Integer(search.offset.unwrap_or(0) as i64));

    debug!(
        "Searching files: pattern={:?} tags={:?}",
        search.pattern, search.tags
    );
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map(params_from_iter(values), <File as Entity>::lazy)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{files, metatags, tags, Catalog};

    fn names(files: &[FileLazy]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn tokens_become_wildcards() {
        assert_eq!(name_pattern("a b").as_deref(), Some("%a%b%"));
        assert_eq!(name_pattern("  holiday   2019 ").as_deref(), Some("%holiday%2019%"));
        assert_eq!(name_pattern("   "), None);
        assert_eq!(to_glob("%a*[b]?%"), "*a[*][[]b][?]*");
    }

    #[test]
    fn empty_search_depends_on_random_sample() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .run(|conn| {
                for i in 0..12 {
                    files::insert(conn, "", &format!("f{i:02}"), "text/plain")?;
                }
                Ok(())
            })
            .unwrap();

        assert!(catalog.search_files(&FileSearch::new()).unwrap().is_empty());
        let sample = catalog
            .search_files(&FileSearch::new().random_sample(DEFAULT_RANDOM_SAMPLE))
            .unwrap();
        assert_eq!(sample.len(), DEFAULT_RANDOM_SAMPLE);
    }

    #[test]
    fn name_filter_is_case_sensitive_and_ordered() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog
            .run(|conn| {
                for name in ["summer beach.jpg", "Summer.png", "beach summer.jpg", "a_b.txt"] {
                    files::insert(conn, "", name, "image/jpeg")?;
                }
                Ok(())
            })
            .unwrap();

        let found = catalog
            .search_files(&FileSearch::new().name("summer beach"))
            .unwrap();
        assert_eq!(names(&found), ["summer beach.jpg"]);

        let found = catalog.search_files(&FileSearch::new().name("ummer")).unwrap();
        assert_eq!(
            names(&found),
            ["Summer.png", "beach summer.jpg", "summer beach.jpg"]
        );

        let found = catalog.search_files(&FileSearch::new().name("a_b")).unwrap();
        assert_eq!(names(&found), ["a_b.txt"]);
    }

    #[test]
    fn tag_filter_is_conjunctive_and_paginated() {
        let catalog = Catalog::open_in_memory().unwrap();
        let (red, blue) = catalog
            .run(|conn| {
                let colour = metatags::insert(conn, "Colour")?;
                let red = tags::insert(conn, "red", colour.id)?;
                let blue = tags::insert(conn, "blue", colour.id)?;
                for (name, tagged) in [
                    ("a", vec![red.id]),
                    ("b", vec![red.id, blue.id]),
                    ("c", vec![blue.id]),
                    ("d", vec![red.id, blue.id]),
                ] {
                    let file = files::insert(conn, "", name, "image/png")?;
                    for tag in tagged {
                        files::add_tag(conn, file.id, tag)?;
                    }
                }
                Ok((red, blue))
            })
            .unwrap();

        let both = FileSearch::new().tags([red.id, blue.id, red.id]);
        assert_eq!(names(&catalog.search_files(&both).unwrap()), ["b", "d"]);
        assert_eq!(
            names(&catalog.search_files(&both.clone().limit(1)).unwrap()),
            ["b"]
        );
        assert_eq!(
            names(&catalog.search_files(&both.offset(1)).unwrap()),
            ["d"]
        );

        let red_named_a = FileSearch::new().tags([red.id]).name("a");
        assert_eq!(names(&catalog.search_files(&red_named_a).unwrap()), ["a"]);
    }
}
