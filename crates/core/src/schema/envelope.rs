use serde::Serialize;

/// A page of objects, `{ "object": "list", "data": [...], "has_more": bool }`.
#[derive(Debug, Clone, Serialize)]
pub struct ListResponse<T> {
    pub object: &'static str,
    pub data: Vec<T>,
    pub has_more: bool,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>, has_more: bool) -> Self {
        Self {
            object: "list",
            data,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResponse<U> {
        ListResponse {
            object: self.object,
            data: self.data.into_iter().map(f).collect(),
            has_more: self.has_more,
        }
    }
}

/// Deletion acknowledgement: `{ "object", "id" | "slug", "deleted": true }`.
#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub object: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub deleted: bool,
}

impl Deleted {
    pub fn by_id(object: &'static str, id: impl ToString) -> Self {
        Self {
            object,
            id: Some(id.to_string()),
            slug: None,
            deleted: true,
        }
    }

    pub fn by_slug(object: &'static str, slug: impl Into<String>) -> Self {
        Self {
            object,
            id: None,
            slug: Some(slug.into()),
            deleted: true,
        }
    }
}
