//! Shared-expense ledger: split calculation, balance aggregation and the
//! HTTP service around them.
//!
//! The ledger core (`money`, `split`, `balance`, `exchange`, `names`) is pure
//! and synchronous. The remaining modules wire it to MongoDB and actix-web.

pub mod auth;
pub mod balance;
pub mod error;
pub mod exchange;
pub mod money;
pub mod names;
pub mod routes;
pub mod schemas;
pub mod settings;
pub mod split;
pub mod store;

pub use balance::{compute_balances, Ledger, NettedLedger, PairwiseDebt};
pub use exchange::{get_exchanges_from_expenses, get_exchanges_from_ledger, Exchange};
pub use money::Money;
pub use names::DisplayNames;
pub use schemas::{Balance, Expense, Split};
pub use split::{compute_splits, Participant, SplitError, SplitPolicy};
