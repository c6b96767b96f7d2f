//! Query filters over the indexed columns.

use super::rows::{day_key, COLUMNS};
use crate::model::{EntityKind, LocalId, ServerId};
use chrono::NaiveDate;
use sqlx::{QueryBuilder, Sqlite};

/// Sort order by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Most recently created first
    #[default]
    Newest,
    Oldest,
}

/// Conjunction of conditions on the indexed columns. An empty filter
/// matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub synced: Option<bool>,
    pub server_id: Option<ServerId>,
    pub owner: Option<LocalId>,
    pub day: Option<NaiveDate>,
    pub category: Option<String>,
    pub exclude: Option<LocalId>,
    pub limit: Option<u32>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn synced(mut self, synced: bool) -> Self {
        self.synced = Some(synced);
        self
    }

    pub fn unsynced(self) -> Self {
        self.synced(false)
    }

    pub fn server_id(mut self, server_id: impl Into<ServerId>) -> Self {
        self.server_id = Some(server_id.into());
        self
    }

    pub fn owner(mut self, owner: LocalId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn day(mut self, day: NaiveDate) -> Self {
        self.day = Some(day);
        self
    }

    /// The composite (owner, day) slot.
    pub fn slot(self, owner: LocalId, day: NaiveDate) -> Self {
        self.owner(owner).day(day)
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Leave one record out (used when checking a slot against a record's own edit).
    pub fn excluding(mut self, local_id: LocalId) -> Self {
        self.exclude = Some(local_id);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn select(&self, kind: EntityKind, order: Order) -> QueryBuilder<'static, Sqlite> {
        let mut builder = QueryBuilder::new(format!("SELECT {COLUMNS} FROM {}", kind.table()));
        self.push_conditions(&mut builder);
        builder.push(match order {
            Order::Newest => " ORDER BY created_at DESC, local_id DESC",
            Order::Oldest => " ORDER BY created_at ASC, local_id ASC",
        });
        if let Some(limit) = self.limit {
            builder.push(" LIMIT ").push_bind(i64::from(limit));
        }
        builder
    }

    pub(crate) fn count(&self, kind: EntityKind) -> QueryBuilder<'static, Sqlite> {
        let mut builder = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", kind.table()));
        self.push_conditions(&mut builder);
        builder
    }

    fn push_conditions(&self, builder: &mut QueryBuilder<'static, Sqlite>) {
        let mut keyword = " WHERE ";
        let mut next = |builder: &mut QueryBuilder<'static, Sqlite>| {
            builder.push(keyword);
            keyword = " AND ";
        };

        if let Some(synced) = self.synced {
            next(builder);
            builder.push("synced = ").push_bind(synced);
        }
        if let Some(server_id) = &self.server_id {
            next(builder);
            builder.push("server_id = ").push_bind(server_id.as_str().to_string());
        }
        if let Some(owner) = self.owner {
            next(builder);
            builder.push("owner_id = ").push_bind(owner.get());
        }
        if let Some(day) = self.day {
            next(builder);
            builder.push("day = ").push_bind(day_key(day));
        }
        if let Some(category) = &self.category {
            next(builder);
            builder.push("category = ").push_bind(category.clone());
        }
        if let Some(exclude) = self.exclude {
            next(builder);
            builder.push("local_id <> ").push_bind(exclude.get());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_selects_everything() {
        let builder = Filter::new().select(EntityKind::Animal, Order::Newest);
        assert_eq!(
            builder.sql(),
            format!("SELECT {COLUMNS} FROM animals ORDER BY created_at DESC, local_id DESC")
        );
    }

    #[test]
    fn conditions_are_joined_with_and() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let builder = Filter::new()
            .slot(LocalId::new(1), day)
            .unsynced()
            .limit(1)
            .select(EntityKind::Report, Order::Oldest);
        let sql = builder.sql();
        assert!(sql.contains("FROM reports WHERE synced = ? AND owner_id = ? AND day = ?"));
        assert!(sql.ends_with("ORDER BY created_at ASC, local_id ASC LIMIT ?"));
    }

    #[test]
    fn count_has_no_order() {
        let builder = Filter::new().category("cow").count(EntityKind::Animal);
        assert_eq!(builder.sql(), "SELECT COUNT(*) FROM animals WHERE category = ?");
    }
}
