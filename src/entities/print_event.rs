use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LabelType {
    #[sea_orm(string_value = "NAMEPLATE")]
    Nameplate,
    #[sea_orm(string_value = "CARTON1")]
    #[serde(rename = "CARTON1")]
    Carton1,
    #[sea_orm(string_value = "CARTON2")]
    #[serde(rename = "CARTON2")]
    Carton2,
    #[sea_orm(string_value = "BOX_LABEL")]
    BoxLabel,
}

impl LabelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nameplate => "NAMEPLATE",
            Self::Carton1 => "CARTON1",
            Self::Carton2 => "CARTON2",
            Self::BoxLabel => "BOX_LABEL",
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintStatus {
    #[sea_orm(string_value = "SUCCESS")]
    Success,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

/// Append-only record of a label print attempt.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "print_events")]
#[schema(as = PrintEvent)]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Serial number, or the order number for box labels
    pub reference: String,
    pub order_number: Option<String>,
    pub label_type: LabelType,
    pub status: PrintStatus,
    pub message: Option<String>,
    pub operator_id: Option<String>,
    pub printed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
