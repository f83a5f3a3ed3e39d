// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The table client and the builders describing tables to create.

use std::{sync::Arc, time::Duration};

use crate::{
    error::YdbError,
    session::Session,
    session_pool::{SessionPool, SessionPoolSettings, SessionProvider},
};

/// Column value types supported by the driver's table builders. Row and
/// parameter marshalling beyond these primitives is the business of the
/// serialization layer, not the runtime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnType {
    Bool,
    Int64,
    Uint64,
    Double,
    Bytes,
    Text,
    Timestamp,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A table schema: columns plus primary key, built up fluently.
///
/// ```
/// use ydb_client::{Column, ColumnType, TableDescription};
///
/// let description = TableDescription::new()
///     .with_column(Column::new("series_id", ColumnType::Uint64))
///     .with_column(Column::new("title", ColumnType::Text))
///     .with_primary_key("series_id");
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TableDescription {
    columns: Vec<Column>,
    primary_key: Vec<String>,
}

impl TableDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_primary_key(mut self, key: impl Into<String>) -> Self {
        self.primary_key.push(key.into());
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }
}

/// Client for table operations, owning a session pool over the driver's
/// endpoints.
pub struct TableClient {
    pool: SessionPool,
}

impl TableClient {
    pub(crate) fn new(provider: Arc<dyn SessionProvider>, settings: SessionPoolSettings) -> Self {
        Self {
            pool: SessionPool::new(provider, settings),
        }
    }

    /// Runs `operation` on a pooled session. See
    /// [`SessionPool::with_session`] for the release-versus-dispose
    /// semantics.
    pub async fn with_session<T, F, Fut>(
        &self,
        operation: F,
        timeout: Option<Duration>,
    ) -> Result<T, YdbError>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: std::future::Future<Output = Result<T, YdbError>>,
    {
        self.pool.with_session(operation, timeout).await
    }

    pub fn session_pool(&self) -> &SessionPool {
        &self.pool
    }

    pub async fn destroy(&self) {
        self.pool.destroy().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_columns_and_keys() {
        let description = TableDescription::new()
            .with_column(Column::new("series_id", ColumnType::Uint64))
            .with_column(Column::new("season_id", ColumnType::Uint64))
            .with_column(Column::new("title", ColumnType::Text))
            .with_primary_key("series_id")
            .with_primary_key("season_id");

        assert_eq!(description.columns().len(), 3);
        assert_eq!(description.columns()[2].name, "title");
        assert_eq!(description.primary_key(), ["series_id", "season_id"]);
    }
}
