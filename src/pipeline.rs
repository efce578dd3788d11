//! Typed query stages for list views.
//!
//! Filter, search, sort and page stages compile into a single SQL statement
//! against the root table. Relationship stages run afterwards as batched
//! lookups: [`join_one`] drops roots whose related row is missing, while
//! [`join_many`] keeps every root with a possibly empty set.

use std::collections::HashMap;
use std::hash::Hash;

use libsql::Value;
use serde::Serialize;
use thiserror::Error;

use crate::id::EntityId;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it", "of",
    "on", "or", "that", "the", "this", "to", "was", "what", "with",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("page must be a positive integer")]
    InvalidPage,
    #[error("limit must be between 1 and {MAX_LIMIT}")]
    InvalidLimit,
    #[error("unsupported sortBy value {0:?}")]
    InvalidSortField(String),
    #[error("sortType must be one of asc, desc, 1 or -1")]
    InvalidSortType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "1" | "ascending" => Ok(Self::Asc),
            "desc" | "-1" | "descending" => Ok(Self::Desc),
            _ => Err(PipelineError::InvalidSortType),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    Views,
    Duration,
    Title,
}

impl SortField {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        match raw.trim() {
            "createdAt" => Ok(Self::CreatedAt),
            "views" => Ok(Self::Views),
            "duration" => Ok(Self::Duration),
            "title" => Ok(Self::Title),
            other => Err(PipelineError::InvalidSortField(other.to_string())),
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Views => "views",
            Self::Duration => "duration",
            Self::Title => "title COLLATE NOCASE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    pub direction: Direction,
}

impl Sort {
    /// Explicit ordering from query parameters. `sortType` without `sortBy`
    /// is ignored; `sortBy` alone sorts ascending.
    pub fn from_query(
        sort_by: Option<&str>,
        sort_type: Option<&str>,
    ) -> Result<Option<Self>, PipelineError> {
        let Some(sort_by) = sort_by.filter(|value| !value.trim().is_empty()) else {
            return Ok(None);
        };
        let field = SortField::parse(sort_by)?;
        let direction = match sort_type.filter(|value| !value.trim().is_empty()) {
            Some(raw) => Direction::parse(raw)?,
            None => Direction::Asc,
        };
        Ok(Some(Self { field, direction }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Result<Self, PipelineError> {
        let page = match page {
            None => DEFAULT_PAGE,
            Some(value) if value >= 1 && value <= u32::MAX as i64 => value as u32,
            Some(_) => return Err(PipelineError::InvalidPage),
        };
        let limit = match limit {
            None => DEFAULT_LIMIT,
            Some(value) if (1..=MAX_LIMIT as i64).contains(&value) => value as u32,
            Some(_) => return Err(PipelineError::InvalidLimit),
        };
        Ok(Self { page, limit })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

/// Pagination block returned next to every paged list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub total_docs: u64,
    pub limit: u32,
    pub page: u32,
    pub total_pages: u64,
    pub has_prev_page: bool,
    pub has_next_page: bool,
}

impl PageInfo {
    pub fn new(page: Page, total_docs: u64) -> Self {
        let total_pages = total_docs.div_ceil(u64::from(page.limit));
        Self {
            total_docs,
            limit: page.limit,
            page: page.page,
            total_pages,
            has_prev_page: page.page > 1,
            has_next_page: u64::from(page.page) < total_pages,
        }
    }
}

/// Lower-cased, de-duplicated search terms with stop words removed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchTerms(Vec<String>);

impl SearchTerms {
    pub fn parse(query: &str) -> Self {
        let mut terms: Vec<String> = Vec::new();
        for word in query
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .filter(|word| !word.is_empty())
        {
            if STOP_WORDS.contains(&word.as_str()) || terms.contains(&word) {
                continue;
            }
            terms.push(word);
        }
        Self(terms)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoFilter {
    Id(EntityId),
    Owner(EntityId),
    Published(bool),
    /// Drops rows whose owner is gone, so counts agree with the owner join.
    OwnerExists,
}

/// Builder for the root video query.
#[derive(Debug, Clone, Default)]
pub struct VideoPipeline {
    filters: Vec<VideoFilter>,
    search: Option<SearchTerms>,
    sort: Option<Sort>,
    page: Option<Page>,
}

/// SQL produced by [`VideoPipeline::compile`]. `count_sql` shares the
/// filter values but ignores ordering and paging.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub select_sql: String,
    pub select_values: Vec<Value>,
    pub count_sql: String,
    pub count_values: Vec<Value>,
}

pub const VIDEO_COLUMNS: &str = "id, video_file, thumbnail, title, description, duration, views, is_published, owner, created_at, updated_at";

impl VideoPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: VideoFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn search(mut self, terms: SearchTerms) -> Self {
        self.search = (!terms.is_empty()).then_some(terms);
        self
    }

    pub fn sort(mut self, sort: Option<Sort>) -> Self {
        self.sort = sort;
        self
    }

    pub fn page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    pub fn requested_page(&self) -> Option<Page> {
        self.page
    }

    pub fn compile(&self) -> CompiledQuery {
        let mut score_values = Vec::new();
        let score_sql = match &self.search {
            Some(terms) => {
                let parts: Vec<&str> = terms
                    .terms()
                    .iter()
                    .map(|term| {
                        score_values.push(Value::from(term.clone()));
                        "(instr(search_title, ?) > 0)"
                    })
                    .collect();
                parts.join(" + ")
            }
            None => "0".to_string(),
        };

        let mut clauses = Vec::new();
        let mut filter_values = Vec::new();
        for filter in &self.filters {
            match filter {
                VideoFilter::Id(id) => {
                    clauses.push("id = ?");
                    filter_values.push(Value::from(id.as_str().to_string()));
                }
                VideoFilter::Owner(owner) => {
                    clauses.push("owner = ?");
                    filter_values.push(Value::from(owner.as_str().to_string()));
                }
                VideoFilter::Published(published) => {
                    clauses.push("is_published = ?");
                    filter_values.push(Value::from(i64::from(*published)));
                }
                VideoFilter::OwnerExists => {
                    clauses.push("owner IN (SELECT id FROM users)");
                }
            }
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let inner = format!(
            "SELECT {VIDEO_COLUMNS}, {score_sql} AS score FROM videos{where_sql}"
        );
        let outer_where = if self.search.is_some() {
            " WHERE score > 0"
        } else {
            ""
        };

        let order_sql = match (self.sort, &self.search) {
            (Some(sort), _) => format!(
                "{} {}, created_at DESC, id DESC",
                sort.field.column(),
                sort.direction.sql()
            ),
            (None, Some(_)) => "score DESC, created_at DESC, id DESC".to_string(),
            (None, None) => "created_at DESC, id DESC".to_string(),
        };

        let mut select_sql =
            format!("SELECT {VIDEO_COLUMNS} FROM ({inner}){outer_where} ORDER BY {order_sql}");
        if let Some(page) = self.page {
            select_sql.push_str(&format!(" LIMIT {} OFFSET {}", page.limit, page.offset()));
        }
        let count_sql = format!("SELECT COUNT(*) FROM ({inner}){outer_where}");

        let mut values = score_values;
        values.extend(filter_values);
        CompiledQuery {
            select_sql,
            select_values: values.clone(),
            count_sql,
            count_values: values,
        }
    }
}

/// One-to-one join with unwind semantics: roots whose key has no related
/// record are dropped. Order of `roots` is preserved.
pub fn join_one<R, K, T>(
    roots: Vec<R>,
    related: &HashMap<K, T>,
    key: impl Fn(&R) -> &K,
) -> Vec<(R, T)>
where
    K: Eq + Hash,
    T: Clone,
{
    roots
        .into_iter()
        .filter_map(|root| {
            let matched = related.get(key(&root)).cloned();
            matched.map(|value| (root, value))
        })
        .collect()
}

/// One-to-many join that keeps every root; unmatched roots get an empty set.
pub fn join_many<R, K, T>(
    roots: Vec<R>,
    related: &HashMap<K, Vec<T>>,
    key: impl Fn(&R) -> &K,
) -> Vec<(R, Vec<T>)>
where
    K: Eq + Hash,
    T: Clone,
{
    roots
        .into_iter()
        .map(|root| {
            let set = related.get(key(&root)).cloned().unwrap_or_default();
            (root, set)
        })
        .collect()
}
