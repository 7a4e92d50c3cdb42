use serde::Serialize;

use crate::{
    balance::{Ledger, NettedLedger},
    money::Money,
    schemas::{Expense, MemberId},
};

#[derive(Clone, Debug)]
struct PersonalBalance {
    id: MemberId,
    balance: Money,
}

/// A payment that settles (part of) the group's debts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub payer: MemberId,
    pub receiver: MemberId,
    pub amount: Money,
}

// The exchanges that will be made if no simplification happens
fn get_naive_exchanges(netted: &NettedLedger) -> Vec<Exchange> {
    netted
        .debts()
        .into_iter()
        .map(|debt| Exchange {
            payer: debt.debtor,
            receiver: debt.creditor,
            amount: debt.amount,
        })
        .collect()
}

// Matches the largest debtor with the largest creditor until everyone is even
fn get_simplified_exchanges(
    mut payers: Vec<PersonalBalance>,
    mut receivers: Vec<PersonalBalance>,
) -> Vec<Exchange> {
    // Ascending by amount so the largest sits at the end; equal amounts pop in id order
    let by_amount = |a: &PersonalBalance, b: &PersonalBalance| {
        a.balance.cmp(&b.balance).then_with(|| b.id.cmp(&a.id))
    };
    payers.sort_by(by_amount);
    receivers.sort_by(by_amount);

    let mut exchanges = Vec::new();

    while let (Some(payer), Some(receiver)) = (payers.last_mut(), receivers.last_mut()) {
        let amount = payer.balance.min(receiver.balance);
        exchanges.push(Exchange {
            payer: payer.id.clone(),
            receiver: receiver.id.clone(),
            amount,
        });
        payer.balance -= amount;
        receiver.balance -= amount;
        if payer.balance.is_zero() {
            payers.pop();
        }
        if receiver.balance.is_zero() {
            receivers.pop();
        }
    }
    exchanges
}

pub fn get_exchanges_from_ledger(netted: &NettedLedger) -> Vec<Exchange> {
    // Divide people into payers and receivers
    let mut payers = Vec::new();
    let mut receivers = Vec::new();

    for (id, balance) in netted.net_positions() {
        if balance.is_zero() {
            continue;
        }
        let person = PersonalBalance {
            id,
            balance: balance.abs(),
        };
        if balance.is_negative() {
            payers.push(person);
        } else {
            receivers.push(person);
        }
    }

    let naive_exchanges = get_naive_exchanges(netted);
    let simplified_exchanges = get_simplified_exchanges(payers, receivers);

    // We ensure the simplification didn't accidentally end up being
    // more complicated than the naive exchanges
    let exchanges = if simplified_exchanges.len() < naive_exchanges.len() {
        simplified_exchanges
    } else {
        naive_exchanges
    };
    tracing::debug!(exchanges = exchanges.len(), "planned settling exchanges");
    exchanges
}

pub fn get_exchanges_from_expenses(expenses: &[Expense]) -> Vec<Exchange> {
    get_exchanges_from_ledger(&Ledger::from_expenses(expenses).net())
}
