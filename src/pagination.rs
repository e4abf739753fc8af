//! Seek (cursor) windows and offset pages with a total count

use crate::connection::session::QueryExecutor;
use crate::error::{GraphError, Result};
use crate::query::{ConditionTree, OrderBy, QueryBuilder, Row, SortDirection, AGGREGATE_COLUMN};
use serde::Serialize;
use serde_json::Value;

/// Default cursor column for the `_id` shorthands
pub const ID_COLUMN: &str = "id";

impl QueryBuilder {
    /// Rows strictly past `cursor` in `direction`, cursor column as primary order.
    ///
    /// A missing cursor starts from the beginning.
    pub fn for_page_after(
        self,
        cursor: Option<Value>,
        limit: usize,
        column: &str,
        direction: SortDirection,
    ) -> Self {
        let op = match direction {
            SortDirection::Asc => ">",
            SortDirection::Desc => "<",
        };
        self.seek(cursor, op, limit, column, direction)
    }

    /// Rows strictly before `cursor`, nearest to the cursor first.
    pub fn for_page_before(
        self,
        cursor: Option<Value>,
        limit: usize,
        column: &str,
        direction: SortDirection,
    ) -> Self {
        let op = match direction {
            SortDirection::Asc => "<",
            SortDirection::Desc => ">",
        };
        self.seek(cursor, op, limit, column, direction.reversed())
    }

    pub fn for_page_after_id(self, limit: usize, last_id: Option<Value>) -> Self {
        self.for_page_after(last_id, limit, ID_COLUMN, SortDirection::Asc)
    }

    pub fn for_page_before_id(self, limit: usize, first_id: Option<Value>) -> Self {
        self.for_page_before(first_id, limit, ID_COLUMN, SortDirection::Asc)
    }

    fn seek(
        self,
        cursor: Option<Value>,
        op: &str,
        limit: usize,
        column: &str,
        direction: SortDirection,
    ) -> Self {
        let mut builder = self.without_order_on(column);
        if let Some(cursor) = cursor.filter(|c| !c.is_null()) {
            let bound = ConditionTree::new().where_(column, op, cursor);
            builder.conditions = std::mem::take(&mut builder.conditions).merge(bound);
        }
        builder.orders.insert(
            0,
            OrderBy {
                column: column.to_string(),
                direction,
            },
        );
        builder.limit(limit)
    }
}

/// One offset page
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: usize,
    pub current_page: usize,
    pub last_page: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, per_page: usize, current_page: usize) -> Self {
        let per_page = per_page.max(1);
        let last_page = (total as usize).div_ceil(per_page).max(1);
        Self {
            items,
            total,
            per_page,
            current_page: current_page.max(1),
            last_page,
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            per_page: self.per_page,
            current_page: self.current_page,
            last_page: self.last_page,
        }
    }
}

/// Read the single `aggregate` count column
pub(crate) fn count_from_rows(rows: &[Row]) -> Result<u64> {
    match rows.first().and_then(|row| row.get(AGGREGATE_COLUMN)) {
        None => Ok(0),
        Some(value) => value
            .as_u64()
            .ok_or_else(|| GraphError::Decode(format!("count is not an integer: {value}"))),
    }
}

/// Fetch page `page` (1-based) and the total row count for `builder`'s filters.
pub async fn paginate(
    exec: &dyn QueryExecutor,
    builder: &QueryBuilder,
    per_page: usize,
    page: usize,
) -> Result<Page<Row>> {
    let per_page = per_page.max(1);
    let total = count_from_rows(&exec.fetch(&builder.to_count()?).await?)?;
    let select = builder.clone().for_page(page, per_page).to_select()?;
    let items = exec.fetch(&select).await?;
    tracing::debug!(label = %builder.label, page, per_page, total, "Paginated");
    Ok(Page::new(items, total, per_page, page))
}
