use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::{
    money::Money,
    names::DisplayNames,
    schemas::{Balance, Expense, MemberId, Settlement, SettlementStatus},
};

// Member ids interned into dense indices, in first-seen order
#[derive(Clone, Debug, Default)]
struct MemberArena {
    ids: Vec<MemberId>,
    index: HashMap<MemberId, usize>,
}

impl MemberArena {
    fn intern(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.ids.push(id.to_string());
        self.index.insert(id.to_string(), idx);
        idx
    }

    fn get(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn id(&self, idx: usize) -> &str {
        &self.ids[idx]
    }
}

/// `debtor` owes `creditor` a positive `amount`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PairwiseDebt {
    pub debtor: MemberId,
    pub creditor: MemberId,
    pub amount: Money,
}

#[derive(Clone, Debug, Default)]
pub struct Ledger {
    members: MemberArena,
    owed: BTreeMap<(usize, usize), Money>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_expenses(expenses: &[Expense]) -> Self {
        let mut ledger = Self::new();
        for expense in expenses {
            ledger.record_expense(expense);
        }
        ledger
    }

    pub fn record_expense(&mut self, expense: &Expense) {
        for split in &expense.splits {
            if split.user_id == expense.paid_by {
                continue;
            }
            self.add_debt(&split.user_id, &expense.paid_by, split.amount);
        }
    }

    /// A completed payment from A to B is booked as B owing A, which cancels
    /// out A's debt once the pair is netted. Other statuses are ignored.
    pub fn record_settlement(&mut self, settlement: &Settlement) {
        if settlement.status != SettlementStatus::Completed {
            return;
        }
        self.add_debt(
            &settlement.to_user_id,
            &settlement.from_user_id,
            settlement.amount,
        );
    }

    pub fn add_debt(&mut self, debtor: &str, creditor: &str, amount: Money) {
        if debtor == creditor || amount.is_zero() {
            return;
        }
        let debtor = self.members.intern(debtor);
        let creditor = self.members.intern(creditor);
        *self.owed.entry((debtor, creditor)).or_default() += amount;
    }

    pub fn owed(&self, debtor: &str, creditor: &str) -> Money {
        match (self.members.get(debtor), self.members.get(creditor)) {
            (Some(d), Some(c)) => self.owed.get(&(d, c)).copied().unwrap_or_default(),
            _ => Money::zero(),
        }
    }

    /// Collapses both directions of every pair, dropping pairs that cancel out.
    pub fn net(&self) -> NettedLedger {
        let mut pairs: BTreeMap<(usize, usize), Money> = BTreeMap::new();
        for (&(debtor, creditor), &amount) in &self.owed {
            if debtor < creditor {
                *pairs.entry((debtor, creditor)).or_default() += amount;
            } else {
                *pairs.entry((creditor, debtor)).or_default() -= amount;
            }
        }

        let debts = pairs
            .into_iter()
            .filter(|(_, net)| !net.is_zero())
            .map(|((low, high), net)| {
                if net.is_positive() {
                    ((low, high), net)
                } else {
                    ((high, low), -net)
                }
            })
            .collect();

        NettedLedger {
            members: self.members.clone(),
            debts,
        }
    }
}

/// Debts after pairwise netting: at most one direction per pair.
#[derive(Clone, Debug, Default)]
pub struct NettedLedger {
    members: MemberArena,
    debts: BTreeMap<(usize, usize), Money>,
}

impl NettedLedger {
    pub fn is_settled(&self) -> bool {
        self.debts.is_empty()
    }

    pub fn debts(&self) -> Vec<PairwiseDebt> {
        let mut debts: Vec<PairwiseDebt> = self
            .debts
            .iter()
            .map(|(&(debtor, creditor), &amount)| PairwiseDebt {
                debtor: self.members.id(debtor).to_string(),
                creditor: self.members.id(creditor).to_string(),
                amount,
            })
            .collect();
        debts.sort_by(|a, b| (&a.debtor, &a.creditor).cmp(&(&b.debtor, &b.creditor)));
        debts
    }

    pub fn net_positions(&self) -> BTreeMap<MemberId, Money> {
        let mut positions: BTreeMap<MemberId, Money> = BTreeMap::new();
        for (&(debtor, creditor), &amount) in &self.debts {
            *positions
                .entry(self.members.id(debtor).to_string())
                .or_default() -= amount;
            *positions
                .entry(self.members.id(creditor).to_string())
                .or_default() += amount;
        }
        positions
    }

    /// Balances between `viewpoint` and each counterparty, sorted by id.
    pub fn balances_for(&self, viewpoint: &str, names: &DisplayNames) -> Vec<Balance> {
        let Some(me) = self.members.get(viewpoint) else {
            return Vec::new();
        };

        // counterparty -> (you owe, they owe)
        let mut pairs: BTreeMap<&str, (Money, Money)> = BTreeMap::new();
        for (&(debtor, creditor), &amount) in &self.debts {
            if debtor == me {
                pairs.entry(self.members.id(creditor)).or_default().0 += amount;
            } else if creditor == me {
                pairs.entry(self.members.id(debtor)).or_default().1 += amount;
            }
        }

        pairs
            .into_iter()
            .filter(|(_, (you_owe, they_owe))| !(you_owe.is_zero() && they_owe.is_zero()))
            .map(|(user_id, (you_owe, they_owe))| Balance {
                user_id: user_id.to_string(),
                display_name: names.resolve(user_id).to_string(),
                you_owe,
                they_owe,
                net_balance: they_owe - you_owe,
            })
            .collect()
    }
}

/// Display names are taken from the splits.
pub fn compute_balances(expenses: &[Expense], viewpoint: &str) -> Vec<Balance> {
    let names = DisplayNames::from_expenses(expenses);
    let balances = Ledger::from_expenses(expenses)
        .net()
        .balances_for(viewpoint, &names);
    tracing::debug!(
        expenses = expenses.len(),
        counterparties = balances.len(),
        "computed balances"
    );
    balances
}
