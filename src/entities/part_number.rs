use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// How units of a part are identified on the line.
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
pub enum SerialGenType {
    /// Every unit scanned individually against the part mask
    #[sea_orm(string_value = "PCB_SERIAL")]
    PcbSerial,
    /// Units synthesized per tray scan
    #[sea_orm(string_value = "LOT_BASED")]
    LotBased,
    /// Whole lot completed in one action
    #[sea_orm(string_value = "ACCESSORIES")]
    Accessories,
}

impl SerialGenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PcbSerial => "PCB_SERIAL",
            Self::LotBased => "LOT_BASED",
            Self::Accessories => "ACCESSORIES",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "part_numbers")]
#[schema(as = PartNumber)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub part_number: String,
    pub revision: Option<String>,
    pub description: Option<String>,
    #[sea_orm(unique)]
    pub product_code: String,
    /// `#` marks a digit, every other character must match literally
    pub serial_mask: Option<String>,
    pub serial_gen_type: SerialGenType,
    pub process_route_id: Option<Uuid>,
    /// Units per packing container
    pub std_qty: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::process_route::Entity",
        from = "Column::ProcessRouteId",
        to = "super::process_route::Column::Id"
    )]
    Route,
    #[sea_orm(has_many = "super::work_order::Entity")]
    WorkOrders,
}

impl Related<super::process_route::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Route.def()
    }
}

impl Related<super::work_order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WorkOrders.def()
    }
}

#[async_trait::async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = self.id {
                self.id = ActiveValue::Set(Uuid::new_v4());
            }
            if let ActiveValue::NotSet = self.std_qty {
                self.std_qty = ActiveValue::Set(1);
            }
            if let ActiveValue::NotSet = self.serial_gen_type {
                self.serial_gen_type = ActiveValue::Set(SerialGenType::PcbSerial);
            }
            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
        }
        self.updated_at = ActiveValue::Set(now);
        Ok(self)
    }
}

impl Model {
    /// Container size, never below one
    pub fn pack_size(&self) -> u32 {
        self.std_qty.max(1) as u32
    }
}
