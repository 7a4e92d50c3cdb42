use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    auth::{check_authorization_level, AuthorizationLevel},
    balance::Ledger,
    error::ApiError,
    exchange::get_exchanges_from_ledger,
    money::Money,
    names::DisplayNames,
    schemas::{
        CurrencyCode, Expense, Group, GroupMember, MemberId, MemberRole, Settlement,
        SettlementStatus,
    },
    settings::AuthSettings,
    split::{compute_splits, Participant, PolicyRequest, SplitPolicy},
    store::Store,
};

#[derive(Deserialize)]
pub struct NewMember {
    pub user_id: MemberId,
    pub display_name: String,
    pub email: Option<String>,
    pub role: Option<MemberRole>,
}

impl NewMember {
    fn into_member(self, role: MemberRole, joined_at: DateTime<Utc>) -> GroupMember {
        GroupMember {
            user_id: self.user_id,
            display_name: self.display_name,
            email: self.email,
            role,
            joined_at,
        }
    }
}

#[derive(Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub currency: Option<CurrencyCode>,
    pub owner: NewMember,
}

#[derive(Deserialize)]
pub struct NewExpense {
    pub title: String,
    pub amount: Money,
    pub currency: Option<CurrencyCode>,
    pub paid_by: MemberId,
    pub date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub category: Option<String>,
    /// Member ids, in the order the split values refer to them.
    pub participants: Vec<MemberId>,
    pub split: PolicyRequest,
}

impl NewExpense {
    /// Resolves participants against the group and computes the splits.
    pub fn into_expense(
        self,
        group: &Group,
        id: String,
        created_by: MemberId,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Expense, ApiError> {
        if group.member(&self.paid_by).is_none() {
            return Err(ApiError::UnknownMember(self.paid_by));
        }
        let participants = self
            .participants
            .into_iter()
            .map(|user_id| match group.member(&user_id) {
                Some(member) => Ok(Participant::new(user_id, member.display_name.clone())),
                None => Err(ApiError::UnknownMember(user_id)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let policy = SplitPolicy::try_from(self.split)?;
        let splits = compute_splits(self.amount, &participants, &self.paid_by, &policy)?;

        Ok(Expense {
            id,
            group_id: group.id.clone(),
            title: self.title,
            amount: self.amount,
            currency: self.currency.unwrap_or_else(|| group.currency.clone()),
            paid_by: self.paid_by,
            created_by,
            date: self.date.unwrap_or_else(|| now.date_naive()),
            notes: self.notes,
            category: self.category,
            created_at,
            updated_at: now,
            splits,
        })
    }
}

#[derive(Deserialize)]
pub struct NewSettlement {
    pub from_user_id: MemberId,
    pub to_user_id: MemberId,
    pub amount: Money,
    pub currency: Option<CurrencyCode>,
    pub date: Option<NaiveDate>,
    pub status: Option<SettlementStatus>,
    pub notes: Option<String>,
}

impl NewSettlement {
    pub fn into_settlement(
        self,
        group: &Group,
        id: String,
        now: DateTime<Utc>,
    ) -> Result<Settlement, ApiError> {
        if !self.amount.is_positive() {
            return Err(ApiError::BadRequest(format!(
                "settlement amount must be positive, got {}",
                self.amount
            )));
        }
        if self.from_user_id == self.to_user_id {
            return Err(ApiError::BadRequest(
                "a settlement needs two different members".to_string(),
            ));
        }
        for user_id in [&self.from_user_id, &self.to_user_id] {
            if group.member(user_id).is_none() {
                return Err(ApiError::UnknownMember(user_id.clone()));
            }
        }
        Ok(Settlement {
            id,
            group_id: group.id.clone(),
            from_user_id: self.from_user_id,
            to_user_id: self.to_user_id,
            amount: self.amount,
            currency: self.currency.unwrap_or_else(|| group.currency.clone()),
            date: self.date.unwrap_or_else(|| now.date_naive()),
            status: self.status.unwrap_or_default(),
            notes: self.notes,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: SettlementStatus,
}

#[derive(Deserialize)]
pub struct SplitPreview {
    pub amount: Money,
    pub payer: MemberId,
    pub participants: Vec<Participant>,
    pub split: PolicyRequest,
}

#[derive(Deserialize)]
pub struct BalanceQuery {
    pub viewpoint: Option<MemberId>,
}

/// Only admins may hand out the admin role.
fn granted_role(
    caller: &AuthorizationLevel,
    group: &Group,
    requested: Option<MemberRole>,
) -> Result<MemberRole, ApiError> {
    match requested.unwrap_or_default() {
        MemberRole::Admin if !caller.is_admin_of(group) => Err(ApiError::Forbidden(
            "only admins can add admins".to_string(),
        )),
        role => Ok(role),
    }
}

fn authorize(request: &HttpRequest, settings: &AuthSettings) -> Result<AuthorizationLevel, ApiError> {
    check_authorization_level(request, settings).ok_or(ApiError::Unauthorized)
}

async fn load_group(
    store: &Store,
    id: &str,
    caller: &AuthorizationLevel,
) -> Result<Group, ApiError> {
    let group = store
        .find_group(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("group `{id}`")))?;
    if !caller.can_access(&group) {
        return Err(ApiError::Forbidden("not a member of this group".to_string()));
    }
    Ok(group)
}

async fn load_ledger(store: &Store, group: &Group) -> Result<(Ledger, DisplayNames), ApiError> {
    let (expenses, settlements) = tokio::try_join!(
        store.list_expenses(&group.id),
        store.list_settlements(&group.id)
    )?;

    let mut ledger = Ledger::from_expenses(&expenses);
    for settlement in &settlements {
        ledger.record_settlement(settlement);
    }
    let mut names = DisplayNames::from_members(&group.members);
    names.fill_from_expenses(&expenses);
    Ok((ledger, names))
}

#[get("/health")]
async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

#[post("/splits/preview")]
async fn preview_splits(json: web::Json<SplitPreview>) -> Result<HttpResponse, ApiError> {
    let preview = json.into_inner();
    let policy = SplitPolicy::try_from(preview.split)?;
    let splits = compute_splits(preview.amount, &preview.participants, &preview.payer, &policy)?;
    Ok(HttpResponse::Ok().json(splits))
}

#[put("/groups/{id}")]
async fn add_group(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewGroup>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let id = id.into_inner();
    let new_group = json.into_inner();
    if let Some(caller_id) = caller.member_id() {
        if caller_id != new_group.owner.user_id {
            return Err(ApiError::Forbidden(
                "groups can only be created for yourself".to_string(),
            ));
        }
    }
    if store.find_group(&id).await?.is_some() {
        return Err(ApiError::Conflict(format!("group `{id}` already exists")));
    }

    let now = Utc::now();
    let owner = new_group.owner.into_member(MemberRole::Admin, now);
    let group = Group {
        id,
        name: new_group.name,
        description: new_group.description,
        currency: new_group.currency.unwrap_or_default(),
        created_by: owner.user_id.clone(),
        created_at: now,
        updated_at: now,
        members: vec![owner],
    };
    store.insert_group(&group).await?;
    tracing::info!(group = %group.id, "group added");
    Ok(HttpResponse::Created().json(group))
}

#[get("/groups/{id}")]
async fn get_group(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    Ok(HttpResponse::Ok().json(group))
}

#[delete("/groups/{id}")]
async fn delete_group(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    if !caller.is_admin_of(&group) {
        return Err(ApiError::Forbidden("only admins can delete a group".to_string()));
    }
    store.delete_group(&group.id).await?;
    tracing::info!(group = %group.id, "group deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[post("/groups/{id}/members")]
async fn add_member(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewMember>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    let new_member = json.into_inner();
    let role = granted_role(&caller, &group, new_member.role)?;
    let member = new_member.into_member(role, Utc::now());
    if group.member(&member.user_id).is_some() {
        return Err(ApiError::Conflict(format!(
            "`{}` is already a member",
            member.user_id
        )));
    }
    store.add_member(&group.id, &member).await?;
    tracing::info!(group = %group.id, member = %member.user_id, "member added");
    Ok(HttpResponse::Created().json(member))
}

#[delete("/groups/{id}/members/{user_id}")]
async fn remove_member(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let (id, user_id) = path.into_inner();
    let group = load_group(&store, &id, &caller).await?;
    let leaving_self = caller.member_id() == Some(user_id.as_str());
    if !leaving_self && !caller.is_admin_of(&group) {
        return Err(ApiError::Forbidden(
            "only admins can remove other members".to_string(),
        ));
    }
    if !store.remove_member(&group.id, &user_id).await? {
        return Err(ApiError::NotFound(format!("member `{user_id}`")));
    }
    tracing::info!(group = %group.id, member = %user_id, "member removed");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/groups/{id}/expenses")]
async fn list_expenses(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    let expenses = store.list_expenses(&group.id).await?;
    Ok(HttpResponse::Ok().json(expenses))
}

#[post("/groups/{id}/expenses")]
async fn add_expense(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewExpense>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    let new_expense = json.into_inner();
    let created_by = caller
        .member_id()
        .map(str::to_string)
        .unwrap_or_else(|| new_expense.paid_by.clone());
    let now = Utc::now();
    let expense = new_expense.into_expense(&group, Uuid::new_v4().to_string(), created_by, now, now)?;
    store.insert_expense(&expense).await?;
    tracing::info!(group = %group.id, expense = %expense.id, amount = %expense.amount, "expense added");
    Ok(HttpResponse::Created().json(expense))
}

#[put("/groups/{id}/expenses/{expense_id}")]
async fn update_expense(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    path: web::Path<(String, String)>,
    json: web::Json<NewExpense>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let (id, expense_id) = path.into_inner();
    let group = load_group(&store, &id, &caller).await?;
    let existing = store
        .find_expense(&group.id, &expense_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("expense `{expense_id}`")))?;

    let expense = json.into_inner().into_expense(
        &group,
        existing.id,
        existing.created_by,
        existing.created_at,
        Utc::now(),
    )?;
    if !store.replace_expense(&expense).await? {
        return Err(ApiError::NotFound(format!("expense `{expense_id}`")));
    }
    tracing::info!(group = %group.id, expense = %expense.id, "expense updated");
    Ok(HttpResponse::Ok().json(expense))
}

#[delete("/groups/{id}/expenses/{expense_id}")]
async fn delete_expense(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let (id, expense_id) = path.into_inner();
    let group = load_group(&store, &id, &caller).await?;
    if !store.delete_expense(&group.id, &expense_id).await? {
        return Err(ApiError::NotFound(format!("expense `{expense_id}`")));
    }
    tracing::info!(group = %group.id, expense = %expense_id, "expense deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[get("/groups/{id}/balances")]
async fn get_balances(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
    query: web::Query<BalanceQuery>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    // Members always see their own balances
    let viewpoint = match (&caller, query.into_inner().viewpoint) {
        (AuthorizationLevel::Member(me), _) => me.clone(),
        (AuthorizationLevel::Service, Some(viewpoint)) => viewpoint,
        (AuthorizationLevel::Service, None) => {
            return Err(ApiError::BadRequest(
                "service callers must pass a `viewpoint`".to_string(),
            ))
        }
    };

    let (ledger, names) = load_ledger(&store, &group).await?;
    let balances = ledger.net().balances_for(&viewpoint, &names);
    Ok(HttpResponse::Ok().json(balances))
}

#[get("/groups/{id}/exchanges")]
async fn get_exchanges(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    let (ledger, _) = load_ledger(&store, &group).await?;
    Ok(HttpResponse::Ok().json(get_exchanges_from_ledger(&ledger.net())))
}

#[get("/groups/{id}/settlements")]
async fn list_settlements(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    let settlements = store.list_settlements(&group.id).await?;
    Ok(HttpResponse::Ok().json(settlements))
}

#[post("/groups/{id}/settlements")]
async fn add_settlement(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    id: web::Path<String>,
    json: web::Json<NewSettlement>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let group = load_group(&store, &id, &caller).await?;
    let settlement = json
        .into_inner()
        .into_settlement(&group, Uuid::new_v4().to_string(), Utc::now())?;
    store.insert_settlement(&settlement).await?;
    tracing::info!(group = %group.id, settlement = %settlement.id, "settlement recorded");
    Ok(HttpResponse::Created().json(settlement))
}

#[put("/groups/{id}/settlements/{settlement_id}/status")]
async fn update_settlement_status(
    store: web::Data<Store>,
    auth: web::Data<AuthSettings>,
    request: HttpRequest,
    path: web::Path<(String, String)>,
    json: web::Json<StatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    let caller = authorize(&request, &auth)?;
    let (id, settlement_id) = path.into_inner();
    let group = load_group(&store, &id, &caller).await?;
    let status = json.into_inner().status;
    if !store
        .set_settlement_status(&group.id, &settlement_id, status)
        .await?
    {
        return Err(ApiError::NotFound(format!("settlement `{settlement_id}`")));
    }
    tracing::info!(group = %group.id, settlement = %settlement_id, ?status, "settlement status changed");
    Ok(HttpResponse::NoContent().finish())
}

/// Registers every route. Group routes expect `Store` and `AuthSettings` app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(preview_splits)
        .service(add_group)
        .service(get_group)
        .service(delete_group)
        .service(add_member)
        .service(remove_member)
        .service(list_expenses)
        .service(add_expense)
        .service(update_expense)
        .service(delete_expense)
        .service(get_balances)
        .service(get_exchanges)
        .service(list_settlements)
        .service(add_settlement)
        .service(update_settlement_status);
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::split::SplitError;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn member(id: &str, name: &str) -> GroupMember {
        GroupMember {
            user_id: id.to_string(),
            display_name: name.to_string(),
            email: None,
            role: MemberRole::Member,
            joined_at: at(),
        }
    }

    fn group() -> Group {
        Group {
            id: "trip".to_string(),
            name: "Trip".to_string(),
            description: None,
            currency: CurrencyCode::new("eur"),
            created_by: "x".to_string(),
            created_at: at(),
            updated_at: at(),
            members: vec![member("x", "Xavi"), member("y", "Yuki"), member("z", "Zoe")],
        }
    }

    fn new_expense(participants: &[&str], split: PolicyRequest) -> NewExpense {
        NewExpense {
            title: "Dinner".to_string(),
            amount: Money::from_minor(10_000),
            currency: None,
            paid_by: "x".to_string(),
            date: None,
            notes: None,
            category: None,
            participants: participants.iter().map(|id| id.to_string()).collect(),
            split,
        }
    }

    fn equal() -> PolicyRequest {
        PolicyRequest {
            kind: "equal".to_string(),
            values: None,
        }
    }

    #[test]
    fn expense_takes_names_and_currency_from_group() {
        let expense = new_expense(&["x", "y", "z"], equal())
            .into_expense(&group(), "e1".to_string(), "x".to_string(), at(), at())
            .unwrap();
        assert_eq!(expense.currency.as_str(), "EUR");
        assert_eq!(expense.date, at().date_naive());
        let names: Vec<_> = expense.splits.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, vec!["Xavi", "Yuki", "Zoe"]);
        let total: Money = expense.splits.iter().map(|s| s.amount).sum();
        assert_eq!(total, expense.amount);
        assert!(expense.splits[0].paid);
    }

    #[test]
    fn expense_rejects_outsiders() {
        let err = new_expense(&["x", "mallory"], equal())
            .into_expense(&group(), "e1".to_string(), "x".to_string(), at(), at())
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownMember(id) if id == "mallory"));

        let mut outsider_pays = new_expense(&["x", "y"], equal());
        outsider_pays.paid_by = "mallory".to_string();
        let err = outsider_pays
            .into_expense(&group(), "e1".to_string(), "x".to_string(), at(), at())
            .unwrap_err();
        assert!(matches!(err, ApiError::UnknownMember(_)));
    }

    #[test]
    fn expense_surfaces_split_errors() {
        let split = PolicyRequest {
            kind: "percentage".to_string(),
            values: Some(vec![40.0, 40.0, 10.0]),
        };
        let err = new_expense(&["x", "y", "z"], split)
            .into_expense(&group(), "e1".to_string(), "x".to_string(), at(), at())
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::Split(SplitError::PercentageSumInvalid(_))
        ));
    }

    #[test]
    fn only_admins_grant_admin() {
        let mut group = group();
        group.members[0].role = MemberRole::Admin;
        let admin = AuthorizationLevel::Member("x".to_string());
        let member = AuthorizationLevel::Member("y".to_string());

        assert!(matches!(
            granted_role(&member, &group, Some(MemberRole::Admin)),
            Err(ApiError::Forbidden(_))
        ));
        assert_eq!(
            granted_role(&member, &group, None).unwrap(),
            MemberRole::Member
        );
        assert_eq!(
            granted_role(&admin, &group, Some(MemberRole::Admin)).unwrap(),
            MemberRole::Admin
        );
        assert_eq!(
            granted_role(&AuthorizationLevel::Service, &group, Some(MemberRole::Admin)).unwrap(),
            MemberRole::Admin
        );
    }

    #[test]
    fn settlement_is_validated() {
        let settlement = NewSettlement {
            from_user_id: "y".to_string(),
            to_user_id: "x".to_string(),
            amount: Money::from_minor(1000),
            currency: None,
            date: None,
            status: None,
            notes: None,
        };
        let recorded = settlement
            .into_settlement(&group(), "s1".to_string(), at())
            .unwrap();
        assert_eq!(recorded.status, SettlementStatus::Pending);
        assert_eq!(recorded.currency.as_str(), "EUR");

        let to_self = NewSettlement {
            from_user_id: "y".to_string(),
            to_user_id: "y".to_string(),
            amount: Money::from_minor(1000),
            currency: None,
            date: None,
            status: None,
            notes: None,
        };
        assert!(matches!(
            to_self.into_settlement(&group(), "s2".to_string(), at()),
            Err(ApiError::BadRequest(_))
        ));

        let nothing = NewSettlement {
            from_user_id: "y".to_string(),
            to_user_id: "x".to_string(),
            amount: Money::zero(),
            currency: None,
            date: None,
            status: None,
            notes: None,
        };
        assert!(matches!(
            nothing.into_settlement(&group(), "s3".to_string(), at()),
            Err(ApiError::BadRequest(_))
        ));
    }
}
