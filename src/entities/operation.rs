use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, ConnectionTrait};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A station on the line. `active_operator_id` is the station lock and is
/// only written by the station lock service.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "operations")]
#[schema(as = Operation)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub order_index: i32,
    pub is_initial: bool,
    pub is_final: bool,
    pub active_operator_id: Option<String>,
    pub active_operator_name: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::route_step::Entity")]
    RouteSteps,
}

impl Related<super::route_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RouteSteps.def()
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
            if let ActiveValue::NotSet = self.created_at {
                self.created_at = ActiveValue::Set(now);
            }
            if let ActiveValue::NotSet = self.active_operator_id {
                self.active_operator_id = ActiveValue::Set(None);
                self.active_operator_name = ActiveValue::Set(None);
                self.locked_at = ActiveValue::Set(None);
            }
        }
        self.updated_at = ActiveValue::Set(now);
        Ok(self)
    }
}

impl Model {
    pub fn is_held_by(&self, operator_id: &str) -> bool {
        self.active_operator_id.as_deref() == Some(operator_id)
    }
}
