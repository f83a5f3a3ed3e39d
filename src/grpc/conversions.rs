// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Conversions between the public driver types and their wire counterparts.

use super::api;
use crate::{
    discovery::Endpoint,
    error::YdbError,
    session::{Query, TransactionControl, TransactionMode, TransactionSettings, TxSelector},
    table::{Column, ColumnType, TableDescription},
};

impl From<api::EndpointInfo> for Endpoint {
    fn from(info: api::EndpointInfo) -> Self {
        Endpoint::new(info.address, info.port as u16, info.load_factor)
    }
}

impl From<TransactionMode> for api::TransactionMode {
    fn from(mode: TransactionMode) -> Self {
        match mode {
            TransactionMode::SerializableReadWrite => api::TransactionMode::SerializableReadWrite,
            TransactionMode::OnlineReadOnly => api::TransactionMode::OnlineReadOnly,
            TransactionMode::StaleReadOnly => api::TransactionMode::StaleReadOnly,
        }
    }
}

impl From<TransactionSettings> for api::TransactionSettings {
    fn from(settings: TransactionSettings) -> Self {
        api::TransactionSettings {
            mode: api::TransactionMode::from(settings.mode) as i32,
        }
    }
}

impl From<&TransactionControl> for api::TransactionControl {
    fn from(control: &TransactionControl) -> Self {
        let tx_selector = match &control.selector {
            TxSelector::Id(tx_id) => api::transaction_control::TxSelector::TxId(tx_id.clone()),
            TxSelector::Begin(settings) => {
                api::transaction_control::TxSelector::BeginTx((*settings).into())
            }
        };
        api::TransactionControl {
            commit_tx: control.commit_tx,
            tx_selector: Some(tx_selector),
        }
    }
}

impl From<&Query> for api::execute_data_query_request::Query {
    fn from(query: &Query) -> Self {
        match query {
            Query::Yql(text) => api::execute_data_query_request::Query::YqlText(text.clone()),
            Query::Prepared(prepared) => {
                api::execute_data_query_request::Query::QueryId(prepared.query_id.clone())
            }
        }
    }
}

impl From<ColumnType> for api::PrimitiveType {
    fn from(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Bool => api::PrimitiveType::Bool,
            ColumnType::Int64 => api::PrimitiveType::Int64,
            ColumnType::Uint64 => api::PrimitiveType::Uint64,
            ColumnType::Double => api::PrimitiveType::Double,
            ColumnType::Bytes => api::PrimitiveType::Bytes,
            ColumnType::Text => api::PrimitiveType::Text,
            ColumnType::Timestamp => api::PrimitiveType::Timestamp,
        }
    }
}

impl From<&Column> for api::ColumnMeta {
    fn from(column: &Column) -> Self {
        api::ColumnMeta {
            name: column.name.clone(),
            column_type: api::PrimitiveType::from(column.column_type) as i32,
        }
    }
}

impl TryFrom<api::ColumnMeta> for Column {
    type Error = YdbError;

    fn try_from(meta: api::ColumnMeta) -> Result<Self, Self::Error> {
        let column_type = match api::PrimitiveType::try_from(meta.column_type) {
            Ok(api::PrimitiveType::Bool) => ColumnType::Bool,
            Ok(api::PrimitiveType::Int64) => ColumnType::Int64,
            Ok(api::PrimitiveType::Uint64) => ColumnType::Uint64,
            Ok(api::PrimitiveType::Double) => ColumnType::Double,
            Ok(api::PrimitiveType::Bytes) => ColumnType::Bytes,
            Ok(api::PrimitiveType::Text) => ColumnType::Text,
            Ok(api::PrimitiveType::Timestamp) => ColumnType::Timestamp,
            Ok(api::PrimitiveType::Unspecified) | Err(_) => {
                return Err(YdbError::InvalidArgument(format!(
                    "unknown column type {} for column {}",
                    meta.column_type, meta.name
                )));
            }
        };
        Ok(Column {
            name: meta.name,
            column_type,
        })
    }
}

impl From<&TableDescription> for api::CreateTableRequest {
    fn from(description: &TableDescription) -> Self {
        api::CreateTableRequest {
            session_id: String::new(),
            path: String::new(),
            columns: description.columns().iter().map(Into::into).collect(),
            primary_key: description.primary_key().to_vec(),
        }
    }
}

impl TryFrom<api::DescribeTableResult> for TableDescription {
    type Error = YdbError;

    fn try_from(result: api::DescribeTableResult) -> Result<Self, Self::Error> {
        let mut description = TableDescription::new();
        for column in result.columns {
            description = description.with_column(column.try_into()?);
        }
        for key in result.primary_key {
            description = description.with_primary_key(key);
        }
        Ok(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    #[test]
    fn endpoint_from_wire() {
        let endpoint = Endpoint::from(api::EndpointInfo {
            address: "node-3".to_string(),
            port: 2136,
            load_factor: 0.25,
        });
        assert_eq!(endpoint, Endpoint::new("node-3", 2136, 0.0));
        assert_eq!(endpoint.load_factor, 0.25);
    }

    #[test]
    fn auto_tx_encodes_as_begin_and_commit() {
        let control = api::TransactionControl::from(&Session::AUTO_TX);
        assert!(control.commit_tx);
        assert_eq!(
            control.tx_selector,
            Some(api::transaction_control::TxSelector::BeginTx(
                api::TransactionSettings {
                    mode: api::TransactionMode::SerializableReadWrite as i32,
                }
            ))
        );
    }

    #[test]
    fn schema_round_trips_through_the_wire_types() {
        let description = TableDescription::new()
            .with_column(Column::new("id", ColumnType::Uint64))
            .with_column(Column::new("title", ColumnType::Text))
            .with_primary_key("id");
        let request = api::CreateTableRequest::from(&description);
        let result = api::DescribeTableResult {
            columns: request.columns,
            primary_key: request.primary_key,
        };
        let recovered = TableDescription::try_from(result).expect("valid schema");
        assert_eq!(recovered, description);
    }

    #[test]
    fn unknown_column_type_is_rejected() {
        let meta = api::ColumnMeta {
            name: "mystery".to_string(),
            column_type: 999,
        };
        assert!(Column::try_from(meta).is_err());
    }
}
