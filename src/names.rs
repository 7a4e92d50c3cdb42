use std::collections::HashMap;

use crate::schemas::{Expense, GroupMember, MemberId};

#[derive(Clone, Debug, Default)]
pub struct DisplayNames {
    names: HashMap<MemberId, String>,
}

impl DisplayNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_expenses(expenses: &[Expense]) -> Self {
        let mut names = Self::new();
        names.fill_from_expenses(expenses);
        names
    }

    pub fn from_members(members: &[GroupMember]) -> Self {
        let mut names = Self::new();
        for member in members {
            names
                .names
                .insert(member.user_id.clone(), member.display_name.clone());
        }
        names
    }

    // existing entries win
    pub fn fill_from_expenses(&mut self, expenses: &[Expense]) {
        for split in expenses.iter().flat_map(|expense| &expense.splits) {
            self.names
                .entry(split.user_id.clone())
                .or_insert_with(|| split.display_name.clone());
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&str> {
        self.names.get(user_id).map(String::as_str)
    }

    pub fn resolve<'a>(&'a self, user_id: &'a str) -> &'a str {
        self.get(user_id).unwrap_or(user_id)
    }
}
