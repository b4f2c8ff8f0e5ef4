use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::ListResponse;
use super::validation::{trim_to_none, ValidationError, Validator};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Raw pagination query, exactly as it arrives on the query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub limit: usize,
    pub order: SortOrder,
    pub after: Option<String>,
    pub before: Option<String>,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            order: SortOrder::Desc,
            after: None,
            before: None,
        }
    }
}

impl ListParams {
    pub fn validate(self) -> Result<Pagination, ValidationError> {
        let mut validator = Validator::new();

        let limit = match trim_to_none(self.limit) {
            None => DEFAULT_LIMIT,
            Some(raw) => match raw.parse::<i64>() {
                Ok(value) if value >= 1 => usize::try_from(value).unwrap_or(MAX_LIMIT).min(MAX_LIMIT),
                Ok(_) => {
                    validator.push("limit", "must be at least 1");
                    DEFAULT_LIMIT
                }
                Err(_) => {
                    validator.push("limit", "must be an integer");
                    DEFAULT_LIMIT
                }
            },
        };

        let order = match trim_to_none(self.order).as_deref() {
            None => SortOrder::Desc,
            Some("asc") => SortOrder::Asc,
            Some("desc") => SortOrder::Desc,
            Some(_) => {
                validator.push("order", "must be one of asc, desc");
                SortOrder::Desc
            }
        };

        let after = trim_to_none(self.after);
        let before = trim_to_none(self.before);
        validator.check(
            after.is_none() || before.is_none(),
            "before",
            "cannot be combined with after",
        );
        validator.finish()?;

        Ok(Pagination {
            limit,
            order,
            after,
            before,
        })
    }
}

/// Something that can be listed with cursor pagination.
pub trait Cursor {
    fn cursor(&self) -> String;
    fn created_at(&self) -> DateTime<Utc>;
}

/// Order `items` by creation time and cut one page out of them.
///
/// An unknown cursor yields an empty page rather than restarting from the top.
pub fn paginate<T: Cursor>(mut items: Vec<T>, pagination: &Pagination) -> ListResponse<T> {
    items.sort_by(|left, right| {
        left.created_at()
            .cmp(&right.created_at())
            .then_with(|| left.cursor().cmp(&right.cursor()))
    });
    if pagination.order == SortOrder::Desc {
        items.reverse();
    }

    let position = |cursor: &str, items: &[T]| items.iter().position(|item| item.cursor() == cursor);

    if let Some(after) = pagination.after.as_deref() {
        let Some(index) = position(after, &items) else {
            return ListResponse::new(Vec::new(), false);
        };
        let rest: Vec<T> = items.into_iter().skip(index + 1).collect();
        let has_more = rest.len() > pagination.limit;
        return ListResponse::new(rest.into_iter().take(pagination.limit).collect(), has_more);
    }

    if let Some(before) = pagination.before.as_deref() {
        let Some(index) = position(before, &items) else {
            return ListResponse::new(Vec::new(), false);
        };
        let has_more = index > pagination.limit;
        let start = index.saturating_sub(pagination.limit);
        let page = items.into_iter().skip(start).take(index - start).collect();
        return ListResponse::new(page, has_more);
    }

    let has_more = items.len() > pagination.limit;
    ListResponse::new(items.into_iter().take(pagination.limit).collect(), has_more)
}
