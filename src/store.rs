//! MongoDB persistence for groups, expenses and settlements.
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
    Client, Collection, Database, IndexModel,
};
use thiserror::Error;

use crate::schemas::{Expense, Group, GroupMember, Settlement, SettlementStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("could not encode document: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("{0} already exists")]
    Duplicate(String),
}

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

/// Handle on the service database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    db: Database,
}

impl Store {
    pub fn new(client: &Client, database: &str) -> Self {
        Self {
            db: client.database(database),
        }
    }

    fn groups(&self) -> Collection<Group> {
        self.db.collection("groups")
    }

    fn expenses(&self) -> Collection<Expense> {
        self.db.collection("expenses")
    }

    fn settlements(&self) -> Collection<Settlement> {
        self.db.collection("settlements")
    }

    /// Group ids are unique; run once at startup.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.groups().create_index(unique_id, None).await?;
        Ok(())
    }

    pub async fn insert_group(&self, group: &Group) -> Result<(), StoreError> {
        match self.groups().insert_one(group, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => {
                Err(StoreError::Duplicate(format!("group `{}`", group.id)))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.groups().find_one(doc! { "id": id }, None).await?)
    }

    /// Removes the group along with its expenses and settlements.
    pub async fn delete_group(&self, id: &str) -> Result<bool, StoreError> {
        let deleted = self.groups().delete_one(doc! { "id": id }, None).await?;
        self.expenses()
            .delete_many(doc! { "group_id": id }, None)
            .await?;
        self.settlements()
            .delete_many(doc! { "group_id": id }, None)
            .await?;
        Ok(deleted.deleted_count > 0)
    }

    pub async fn add_member(&self, group_id: &str, member: &GroupMember) -> Result<bool, StoreError> {
        let member = bson::to_bson(member)?;
        let now = bson::to_bson(&Utc::now())?;
        let update = doc! {
            "$push": { "members": member },
            "$set": { "updated_at": now },
        };
        let result = self
            .groups()
            .update_one(doc! { "id": group_id }, update, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    pub async fn remove_member(&self, group_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let now = bson::to_bson(&Utc::now())?;
        let update = doc! {
            "$pull": { "members": { "user_id": user_id } },
            "$set": { "updated_at": now },
        };
        let result = self
            .groups()
            .update_one(doc! { "id": group_id, "members.user_id": user_id }, update, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    pub async fn insert_expense(&self, expense: &Expense) -> Result<(), StoreError> {
        self.expenses().insert_one(expense, None).await?;
        Ok(())
    }

    pub async fn find_expense(
        &self,
        group_id: &str,
        expense_id: &str,
    ) -> Result<Option<Expense>, StoreError> {
        Ok(self
            .expenses()
            .find_one(expense_filter(group_id, expense_id), None)
            .await?)
    }

    pub async fn replace_expense(&self, expense: &Expense) -> Result<bool, StoreError> {
        let result = self
            .expenses()
            .replace_one(expense_filter(&expense.group_id, &expense.id), expense, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    pub async fn delete_expense(&self, group_id: &str, expense_id: &str) -> Result<bool, StoreError> {
        let result = self
            .expenses()
            .delete_one(expense_filter(group_id, expense_id), None)
            .await?;
        Ok(result.deleted_count > 0)
    }

    /// Expenses of a group, most recent date first.
    pub async fn list_expenses(&self, group_id: &str) -> Result<Vec<Expense>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "date": -1, "created_at": -1 })
            .build();
        let cursor = self
            .expenses()
            .find(doc! { "group_id": group_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn insert_settlement(&self, settlement: &Settlement) -> Result<(), StoreError> {
        self.settlements().insert_one(settlement, None).await?;
        Ok(())
    }

    pub async fn list_settlements(&self, group_id: &str) -> Result<Vec<Settlement>, StoreError> {
        let options = FindOptions::builder()
            .sort(doc! { "date": -1, "created_at": -1 })
            .build();
        let cursor = self
            .settlements()
            .find(doc! { "group_id": group_id }, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    pub async fn set_settlement_status(
        &self,
        group_id: &str,
        settlement_id: &str,
        status: SettlementStatus,
    ) -> Result<bool, StoreError> {
        let status = bson::to_bson(&status)?;
        let now = bson::to_bson(&Utc::now())?;
        let update = doc! {
            "$set": { "status": status, "updated_at": now }
        };
        let result = self
            .settlements()
            .update_one(doc! { "group_id": group_id, "id": settlement_id }, update, None)
            .await?;
        Ok(result.matched_count > 0)
    }
}

fn expense_filter(group_id: &str, expense_id: &str) -> Document {
    doc! { "group_id": group_id, "id": expense_id }
}
