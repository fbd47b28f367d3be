//! Accounts, transactions and budgets

use anyhow::{anyhow, Result};
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Subcommand};
use finapp::database::{
    Account, AccountRepository, AccountType, Budget, BudgetPeriod, BudgetRepository, NewAccount,
    NewBudget, NewTransaction, Transaction, TransactionRepository, TransactionType,
};
use finapp::output::{truncate_text, DEFAULT_TEXT_MAX_LEN};
use finapp::{DbHandle, FinappConfig, OutputFormat};
use serde::Serialize;
use tabled::Tabled;

use super::{display_opt, find_user, open_database, print_rows, print_value};

#[derive(Args)]
pub struct AccountArgs {
    /// Email of the account owner
    #[clap(long, short)]
    pub user: String,

    #[clap(subcommand)]
    pub command: AccountCommands,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open an account
    Add {
        name: String,

        /// checking, savings, credit-card, investment, cash, other
        #[clap(long = "type", short = 't', default_value = "checking")]
        account_type: AccountType,

        /// Opening balance
        #[clap(long, default_value_t = 0.0)]
        balance: f64,

        #[clap(long, default_value = "USD")]
        currency: String,
    },

    /// List accounts with balances
    List,
}

#[derive(Args)]
pub struct TxArgs {
    #[clap(long, short)]
    pub user: String,

    #[clap(subcommand)]
    pub command: TxCommands,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Record an income or expense
    Add {
        /// Account ID
        #[clap(long, short)]
        account: i64,

        amount: f64,

        /// income or expense
        #[clap(long = "type", short = 't', default_value = "expense")]
        transaction_type: TransactionType,

        #[clap(long, short)]
        category: Option<String>,

        #[clap(long, short)]
        description: Option<String>,

        /// Date of the transaction, YYYY-MM-DD (default: today)
        #[clap(long)]
        date: Option<NaiveDate>,
    },

    /// List transactions
    List {
        /// Only this account
        #[clap(long, short)]
        account: Option<i64>,

        /// First day, YYYY-MM-DD (default: first day of this month)
        #[clap(long)]
        from: Option<NaiveDate>,

        /// Last day, YYYY-MM-DD (default: today)
        #[clap(long)]
        to: Option<NaiveDate>,

        /// Show expense totals per category instead of transactions
        #[clap(long)]
        by_category: bool,
    },
}

#[derive(Args)]
pub struct BudgetArgs {
    #[clap(long, short)]
    pub user: String,

    #[clap(subcommand)]
    pub command: BudgetCommands,
}

#[derive(Subcommand)]
pub enum BudgetCommands {
    /// Create a budget for a category
    Add {
        category: String,

        amount: f64,

        /// weekly, monthly, yearly or custom
        #[clap(long, short, default_value = "monthly")]
        period: BudgetPeriod,

        /// First day, YYYY-MM-DD (default: today)
        #[clap(long)]
        start: Option<NaiveDate>,

        /// Last day, YYYY-MM-DD (overrides the period)
        #[clap(long)]
        end: Option<NaiveDate>,
    },

    /// List budgets with the amount spent so far
    List,
}

#[derive(Tabled, Serialize)]
struct AccountRow {
    id: i64,
    name: String,
    #[tabled(rename = "type")]
    account_type: String,
    balance: String,
}

impl From<&Account> for AccountRow {
    fn from(account: &Account) -> Self {
        AccountRow {
            id: account.account_id,
            name: truncate_text(&account.name, DEFAULT_TEXT_MAX_LEN),
            account_type: account.account_type.to_string(),
            balance: format!("{:.2} {}", account.balance, account.currency),
        }
    }
}

#[derive(Tabled, Serialize)]
struct TransactionRow {
    id: i64,
    date: NaiveDate,
    account: i64,
    #[tabled(rename = "type")]
    transaction_type: String,
    amount: String,
    category: String,
    description: String,
}

impl From<&Transaction> for TransactionRow {
    fn from(tx: &Transaction) -> Self {
        TransactionRow {
            id: tx.transaction_id,
            date: tx.date,
            account: tx.account_id,
            transaction_type: tx.transaction_type.to_string(),
            amount: format!("{:.2}", tx.amount),
            category: display_opt(&tx.category),
            description: truncate_text(&display_opt(&tx.description), DEFAULT_TEXT_MAX_LEN),
        }
    }
}

#[derive(Tabled, Serialize)]
struct CategoryRow {
    category: String,
    count: u64,
    total: String,
}

#[derive(Serialize)]
struct BudgetStatus {
    #[serde(flatten)]
    budget: Budget,
    spent: f64,
    remaining: f64,
}

#[derive(Tabled, Serialize)]
struct BudgetRow {
    id: i64,
    category: String,
    period: String,
    window: String,
    amount: String,
    spent: String,
    remaining: String,
}

impl From<&BudgetStatus> for BudgetRow {
    fn from(status: &BudgetStatus) -> Self {
        let budget = &status.budget;
        BudgetRow {
            id: budget.budget_id,
            category: budget.category.clone(),
            period: budget.period.to_string(),
            window: format!(
                "{} .. {}",
                budget.start_date,
                display_opt(&budget.window_end())
            ),
            amount: format!("{:.2}", budget.amount),
            spent: format!("{:.2}", status.spent),
            remaining: format!("{:.2}", status.remaining),
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn owned_account(db: &DbHandle, user_id: i64, account_id: i64) -> Result<Account> {
    db.with_conn(|conn| AccountRepository::new(conn).find_by_id(account_id))?
        .filter(|account| account.user_id == user_id)
        .ok_or_else(|| anyhow!("No account with ID {} for this user", account_id))
}

pub async fn run_account(
    config: &FinappConfig,
    args: AccountArgs,
    output_format: OutputFormat,
) -> Result<()> {
    let (_coordinator, db) = open_database(config).await?;
    let user = find_user(&db, &args.user)?;

    match args.command {
        AccountCommands::Add {
            name,
            account_type,
            balance,
            currency,
        } => {
            let new = NewAccount {
                name,
                account_type,
                balance,
                currency,
            };
            let account =
                db.with_conn(|conn| AccountRepository::new(conn).create(user.user_id, &new))?;
            print_value(&account, output_format, |account| {
                println!("Opened account {}: {}", account.account_id, account.name);
            })
        }
        AccountCommands::List => {
            let accounts =
                db.with_conn(|conn| AccountRepository::new(conn).list_for_user(user.user_id))?;
            if output_format.is_json() {
                println!("{}", output_format.to_json(&accounts)?);
                return Ok(());
            }
            let rows: Vec<AccountRow> = accounts.iter().map(AccountRow::from).collect();
            print_rows(&rows, output_format)
        }
    }
}

pub async fn run_tx(config: &FinappConfig, args: TxArgs, output_format: OutputFormat) -> Result<()> {
    let (_coordinator, db) = open_database(config).await?;
    let user = find_user(&db, &args.user)?;

    match args.command {
        TxCommands::Add {
            account,
            amount,
            transaction_type,
            category,
            description,
            date,
        } => {
            if amount <= 0.0 {
                return Err(anyhow!("Amount must be positive; use --type to choose the direction"));
            }
            owned_account(&db, user.user_id, account)?;
            let new = NewTransaction {
                account_id: account,
                description,
                amount,
                transaction_type,
                category,
                date: date.unwrap_or_else(today),
            };
            let tx = db.with_conn(|conn| TransactionRepository::new(conn).record(user.user_id, &new))?;
            print_value(&tx, output_format, |tx| {
                println!(
                    "Recorded {} {:.2} on account {} ({})",
                    tx.transaction_type, tx.amount, tx.account_id, tx.date
                );
            })
        }
        TxCommands::List {
            account,
            from,
            to,
            by_category,
        } => {
            let to = to.unwrap_or_else(today);
            let from = from.unwrap_or_else(|| to.with_day(1).unwrap_or(to));

            if by_category {
                let totals = db.with_conn(|conn| {
                    TransactionRepository::new(conn).total_by_category(
                        user.user_id,
                        TransactionType::Expense,
                        from,
                        to,
                    )
                })?;
                if output_format.is_json() {
                    println!("{}", output_format.to_json(&totals)?);
                    return Ok(());
                }
                let rows: Vec<CategoryRow> = totals
                    .into_iter()
                    .map(|t| CategoryRow {
                        category: t.category,
                        count: t.count,
                        total: format!("{:.2}", t.total),
                    })
                    .collect();
                return print_rows(&rows, output_format);
            }

            let transactions: Vec<Transaction> = match account {
                Some(account_id) => {
                    owned_account(&db, user.user_id, account_id)?;
                    db.with_conn(|conn| TransactionRepository::new(conn).list_for_account(account_id))?
                        .into_iter()
                        .filter(|tx| tx.date >= from && tx.date <= to)
                        .collect()
                }
                None => db.with_conn(|conn| {
                    TransactionRepository::new(conn).list_for_user_between(user.user_id, from, to)
                })?,
            };
            if output_format.is_json() {
                println!("{}", output_format.to_json(&transactions)?);
                return Ok(());
            }
            let rows: Vec<TransactionRow> = transactions.iter().map(TransactionRow::from).collect();
            print_rows(&rows, output_format)
        }
    }
}

pub async fn run_budget(
    config: &FinappConfig,
    args: BudgetArgs,
    output_format: OutputFormat,
) -> Result<()> {
    let (_coordinator, db) = open_database(config).await?;
    let user = find_user(&db, &args.user)?;

    match args.command {
        BudgetCommands::Add {
            category,
            amount,
            period,
            start,
            end,
        } => {
            let new = NewBudget {
                category,
                amount,
                period,
                start_date: start.unwrap_or_else(today),
                end_date: end,
            };
            let budget =
                db.with_conn(|conn| BudgetRepository::new(conn).create(user.user_id, &new))?;
            print_value(&budget, output_format, |budget| {
                println!(
                    "Created {} budget {} for {}: {:.2}",
                    budget.period, budget.budget_id, budget.category, budget.amount
                );
            })
        }
        BudgetCommands::List => {
            let statuses = db.with_conn(|conn| {
                let repo = BudgetRepository::new(conn);
                repo.list_for_user(user.user_id)?
                    .into_iter()
                    .map(|budget| -> finapp::database::Result<BudgetStatus> {
                        let spent = repo.spent(&budget)?;
                        Ok(BudgetStatus {
                            remaining: budget.amount - spent,
                            spent,
                            budget,
                        })
                    })
                    .collect::<finapp::database::Result<Vec<_>>>()
            })?;
            if output_format.is_json() {
                println!("{}", output_format.to_json(&statuses)?);
                return Ok(());
            }
            let rows: Vec<BudgetRow> = statuses.iter().map(BudgetRow::from).collect();
            print_rows(&rows, output_format)
        }
    }
}
